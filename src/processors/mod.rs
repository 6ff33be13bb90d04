pub mod authenticate;
pub mod messaging;
pub mod query;
pub mod queue_admin;
pub mod terminate;

use std::sync::Arc;

use serde_json::json;

use crate::logging::LogLevel;
use crate::message::Message;
use crate::queues::{is_valid_queue_name, normalize_queue_name, MAX_QUEUE_NAME_LEN};
use crate::security::{AccessLevel, ResourceClass};
use crate::server::ServerContext;
use crate::wire::protocol::{Request, Response, ResponseCode};
use crate::wire::session::Session;

/// Runs one incoming message through the request pipeline and builds the
/// correlated reply. Failures are reported through the response code; nothing
/// here ends the session.
pub fn dispatch(context: &ServerContext, session: &Arc<Session>, message: &Message) -> Message {
    let response = match message.as_request() {
        Some(request) => process(context, session, request),
        None => Response::fail(format!(
            "expected a request, received a {} message",
            message.payload.kind()
        )),
    };

    let level = match response.code {
        ResponseCode::Ok => LogLevel::Debug,
        _ => LogLevel::Info,
    };
    context.logger.log(
        level,
        Some("processors"),
        "Request processed",
        Some(json!({
            "session_id": session.id().to_string(),
            "request": message.payload.kind(),
            "code": response.code.to_string(),
            "reason": response.reason,
        })),
    );

    message.reply_to(response)
}

pub fn process(context: &ServerContext, session: &Arc<Session>, request: &Request) -> Response {
    if !context.is_enabled() {
        return Response::fail("server disabled");
    }

    if !matches!(request, Request::Authenticate { .. }) {
        if let Err(denied) = authorize(context, session, request) {
            return denied;
        }
    }

    match request {
        Request::Authenticate { user, password } => {
            authenticate::process(context, session, user, password)
        }
        Request::Define {
            queue,
            threshold,
            disposition,
        } => queue_admin::define(context, session, queue, *threshold, *disposition),
        Request::Delete { queue, force } => queue_admin::delete(context, queue, *force),
        Request::Alter {
            queue,
            threshold,
            disposition,
        } => queue_admin::alter(context, session, queue, *threshold, *disposition),
        Request::Get {
            queue,
            timeout_ms,
            poll_interval_ms,
        } => messaging::get(context, session, queue, *timeout_ms, *poll_interval_ms),
        Request::Put { queue, message } => messaging::put(context, queue, message),
        Request::Query {
            kind,
            filter,
            all_data,
        } => query::process(context, *kind, filter, *all_data),
        Request::Terminate { target } => terminate::process(context, session, target),
    }
}

/// Session must be ACTIVE and its user granted the access the request needs.
fn authorize(context: &ServerContext, session: &Session, request: &Request) -> Result<(), Response> {
    let Some(user) = session.user() else {
        return Err(Response::error("Not authenticated"));
    };

    let (resource_class, resource_name, level) = required_access(request);
    if context
        .access
        .is_access_permitted(&user, resource_class, &resource_name, level)
    {
        return Ok(());
    }

    context.logger.log(
        LogLevel::Warn,
        Some("processors::access"),
        "Access denied",
        Some(json!({
            "user": user.name,
            "resource_class": resource_class.name(),
            "resource": resource_name,
            "required": level.to_string(),
        })),
    );
    Err(Response::error("not permitted"))
}

/// Queue operations are checked against the queue, everything else against
/// the command named after the verb.
fn required_access(request: &Request) -> (ResourceClass, String, AccessLevel) {
    match request {
        Request::Get { queue, .. } => (
            ResourceClass::Queue,
            normalize_queue_name(queue),
            AccessLevel::READ,
        ),
        Request::Put { queue, .. } => (
            ResourceClass::Queue,
            normalize_queue_name(queue),
            AccessLevel::WRITE,
        ),
        other => (
            ResourceClass::Command,
            other.verb().to_owned(),
            AccessLevel::EXECUTE,
        ),
    }
}

/// Normalized name, or the FAIL response for an invalid one.
pub(crate) fn validated_queue_name(raw: &str) -> Result<String, Response> {
    let name = normalize_queue_name(raw);
    if is_valid_queue_name(&name) {
        Ok(name)
    } else {
        Err(Response::fail(format!(
            "invalid queue name '{raw}': expected 1 to {MAX_QUEUE_NAME_LEN} characters of [A-Za-z0-9_.$-]"
        )))
    }
}

/// Thresholds arrive as signed wire ints and must be positive.
pub(crate) fn validated_threshold(raw: i32) -> Result<usize, Response> {
    match usize::try_from(raw) {
        Ok(threshold) if threshold > 0 => Ok(threshold),
        _ => Err(Response::fail(format!(
            "threshold must be a positive number, got {raw}"
        ))),
    }
}

#[cfg(test)]
pub mod tests {
    use std::net::TcpStream;
    use std::sync::Arc;

    use crate::config::{AceConfig, AppConfig, GroupConfig, UserConfig};
    use crate::logging::tests::{memory_logger, MemorySink};
    use crate::logging::LogLevel;
    use crate::message::Message;
    use crate::pools::ConnectionRegistry;
    use crate::queues::{Disposition, QueueRepository};
    use crate::security::{ConfigSecurityStore, UserEntity};
    use crate::server::ServerContext;
    use crate::shutdown::ShutdownSignal;
    use crate::wire::codec::WireCodec;
    use crate::wire::protocol::{Request, ResponseCode};
    use crate::wire::session::tests::loopback_connection;
    use crate::wire::session::Session;

    use super::{dispatch, process, validated_queue_name, validated_threshold};

    /// Default config plus a `reader` account that may only GET from `ORD*`.
    pub fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.queues.default_threshold = 100;
        config.queues.min_poll_interval_ms = 5;
        config.queues.default_poll_interval_ms = 10;
        config.security.users.push(UserConfig {
            name: "reader".to_owned(),
            password: "secret".to_owned(),
            groups: vec!["READERS".to_owned()],
        });
        config.security.groups.push(GroupConfig {
            name: "READERS".to_owned(),
            description: None,
        });
        config.security.aces.push(AceConfig {
            resource_class: "queue".to_owned(),
            pattern: "ORD*".to_owned(),
            group: "READERS".to_owned(),
            access: vec!["read".to_owned()],
        });
        config
    }

    pub fn test_context(config: AppConfig) -> (Arc<ServerContext>, Arc<MemorySink>) {
        let (logger, sink) = memory_logger(LogLevel::Verbose);
        let logger = Arc::new(logger);
        let access = ConfigSecurityStore::from_config(&config.security)
            .expect("test security config should be valid");
        let context = ServerContext::new(
            Arc::new(config.clone()),
            Arc::clone(&logger),
            Arc::new(WireCodec::standard()),
            Arc::new(QueueRepository::new(Arc::clone(&logger), None)),
            Arc::new(ConnectionRegistry::new(
                config.server.max_connections,
                Arc::clone(&logger),
            )),
            Arc::new(access),
            ShutdownSignal::new(),
        );
        (Arc::new(context), sink)
    }

    /// Registered session over a loopback socket; keep the stream alive.
    pub fn registered_session(context: &ServerContext) -> (Arc<Session>, TcpStream) {
        let (connection, client) = loopback_connection();
        context
            .registry
            .register_connection(Arc::clone(&connection))
            .expect("connection should register");
        let session = Arc::new(Session::new(connection));
        context
            .registry
            .register_session(Arc::clone(&session))
            .expect("session should register");
        (session, client)
    }

    pub fn logged_in(context: &ServerContext, user: &str, groups: &[&str]) -> (Arc<Session>, TcpStream) {
        let (session, client) = registered_session(context);
        session
            .authenticate(UserEntity {
                name: user.to_owned(),
                groups: groups.iter().map(|group| (*group).to_owned()).collect(),
            })
            .expect("test login should pass");
        (session, client)
    }

    #[test]
    fn disabled_server_fails_before_anything_else() {
        let (context, _) = test_context(test_config());
        context.set_enabled(false);
        let (session, _client) = registered_session(&context);

        let response = process(
            &context,
            &session,
            &Request::Authenticate {
                user: "admin".to_owned(),
                password: "admin".to_owned(),
            },
        );
        assert_eq!(response.code, ResponseCode::Fail);
        assert_eq!(response.reason.as_deref(), Some("server disabled"));
        assert!(session.user().is_none());
    }

    #[test]
    fn requests_before_login_are_rejected_with_error() {
        let (context, _) = test_context(test_config());
        let (session, _client) = registered_session(&context);

        let response = process(
            &context,
            &session,
            &Request::Define {
                queue: "Q".to_owned(),
                threshold: None,
                disposition: Disposition::Permanent,
            },
        );
        assert_eq!(response.code, ResponseCode::Error);
        assert_eq!(response.reason.as_deref(), Some("Not authenticated"));
        assert!(context.repository.get("Q").is_none());
    }

    #[test]
    fn authorization_is_checked_per_resource() {
        let (context, sink) = test_context(test_config());
        let (session, _client) = logged_in(&context, "reader", &["READERS"]);

        let define = process(
            &context,
            &session,
            &Request::Define {
                queue: "ORDERS".to_owned(),
                threshold: None,
                disposition: Disposition::Permanent,
            },
        );
        assert_eq!(define.code, ResponseCode::Error);
        assert_eq!(define.reason.as_deref(), Some("not permitted"));
        assert!(sink.contains("Access denied"));

        let put = process(
            &context,
            &session,
            &Request::Put {
                queue: "ORDERS".to_owned(),
                message: Box::new(Message::text("x")),
            },
        );
        assert_eq!(put.code, ResponseCode::Error);

        let get = process(
            &context,
            &session,
            &Request::Get {
                queue: "orders".to_owned(),
                timeout_ms: 1,
                poll_interval_ms: 1,
            },
        );
        assert_eq!(get.code, ResponseCode::Fail);
        assert!(get.reason.is_some_and(|reason| reason.contains("not found")));
    }

    #[test]
    fn bare_data_messages_get_fail_and_replies_are_correlated() {
        let (context, _) = test_context(test_config());
        let (session, _client) = registered_session(&context);

        let request = Message::text("hello");
        let reply = dispatch(&context, &session, &request);
        assert_eq!(reply.correlation_id, Some(request.id));
        let response = reply.into_response().expect("reply should be a response");
        assert_eq!(response.code, ResponseCode::Fail);
        assert!(response
            .reason
            .is_some_and(|reason| reason.contains("expected a request")));
    }

    #[test]
    fn validates_names_and_thresholds() {
        assert_eq!(validated_queue_name(" orders.v2 "), Ok("ORDERS.V2".to_owned()));
        assert!(validated_queue_name("bad name").is_err());
        assert!(validated_queue_name(&"Q".repeat(65)).is_err());
        assert_eq!(validated_threshold(3), Ok(3));
        assert!(validated_threshold(0).is_err());
        assert!(validated_threshold(-4).is_err());
    }
}
