use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::config::QueuesConfig;
use crate::logging::LogLevel;
use crate::message::Message;
use crate::queues::{PutOutcome, Queue, QueueError, RepositoryError};
use crate::server::ServerContext;
use crate::wire::protocol::Response;
use crate::wire::session::Session;

use super::validated_queue_name;

fn lookup(context: &ServerContext, queue: &str) -> Result<Arc<Queue>, Response> {
    let name = validated_queue_name(queue)?;
    context.repository.get(&name).ok_or_else(|| {
        Response::fail(RepositoryError::NotFound { name }.to_string())
    })
}

/// Effective (timeout, poll interval) after server policy. `None` waits
/// indefinitely.
pub(crate) fn clamp_wait(
    policy: &QueuesConfig,
    timeout_ms: u64,
    poll_interval_ms: i64,
) -> (Option<Duration>, Duration) {
    let interval_ms = u64::try_from(poll_interval_ms)
        .ok()
        .filter(|interval| *interval > 0)
        .unwrap_or(policy.default_poll_interval_ms)
        .clamp(
            policy.min_poll_interval_ms,
            policy.max_poll_interval_ms.max(policy.min_poll_interval_ms),
        );

    let timeout_ms = match (timeout_ms, policy.max_get_timeout_ms) {
        (0, 0) => None,
        (0, max) => Some(max),
        (requested, 0) => Some(requested),
        (requested, max) => Some(requested.min(max)),
    };

    (
        timeout_ms.map(Duration::from_millis),
        Duration::from_millis(interval_ms),
    )
}

/// GET. Blocks the session's handler until a message arrives, the timeout
/// elapses, or the session, its connection, or the server goes away.
pub fn get(
    context: &ServerContext,
    session: &Session,
    queue: &str,
    timeout_ms: i64,
    poll_interval_ms: i64,
) -> Response {
    let Ok(timeout_ms) = u64::try_from(timeout_ms) else {
        return Response::fail(format!("timeout must not be negative, got {timeout_ms}"));
    };
    let queue = match lookup(context, queue) {
        Ok(queue) => queue,
        Err(response) => return response,
    };

    let (timeout, poll_interval) = clamp_wait(&context.config.queues, timeout_ms, poll_interval_ms);
    let cancelled = || {
        session.is_terminated()
            || !session.connection().is_open()
            || context.shutdown.is_triggered()
    };
    let message = queue.get(timeout, poll_interval, &cancelled);

    context.logger.log(
        LogLevel::Debug,
        Some("processors::messaging"),
        "GET completed",
        Some(json!({
            "session_id": session.id().to_string(),
            "queue": queue.name(),
            "delivered": message.as_ref().map(|message| message.id.to_string()),
            "timeout_ms": timeout.map(|timeout| timeout.as_millis() as u64),
            "poll_interval_ms": poll_interval.as_millis() as u64,
        })),
    );
    Response::delivery(message)
}

/// PUT. The body must be a data message; a suspended queue answers WARN.
pub fn put(context: &ServerContext, queue: &str, message: &Message) -> Response {
    if !message.is_data() {
        return Response::fail(format!(
            "PUT body must be a data message, got {}",
            message.payload.kind()
        ));
    }
    let queue = match lookup(context, queue) {
        Ok(queue) => queue,
        Err(response) => return response,
    };

    match queue.put(message.clone()) {
        Ok(PutOutcome::Accepted) => Response::ok(),
        Ok(PutOutcome::AcceptedAndSuspended) => {
            Response::ok().with_reason(format!("queue '{}' is now suspended", queue.name()))
        }
        Err(error @ QueueError::Suspended { .. }) => Response::warn(error.to_string()),
        Err(error @ QueueError::Closed { .. }) => Response::fail(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use crate::config::QueuesConfig;
    use crate::message::Message;
    use crate::processors::tests::{logged_in, test_config, test_context};
    use crate::queues::Disposition;
    use crate::wire::protocol::{Request, ResponseCode};

    use super::{clamp_wait, get, put};

    #[test]
    fn clamps_wait_to_server_policy() {
        let policy = QueuesConfig {
            default_poll_interval_ms: 100,
            min_poll_interval_ms: 10,
            max_poll_interval_ms: 1_000,
            max_get_timeout_ms: 0,
            ..QueuesConfig::default()
        };
        assert_eq!(clamp_wait(&policy, 0, 0), (None, Duration::from_millis(100)));
        assert_eq!(
            clamp_wait(&policy, 250, 1),
            (Some(Duration::from_millis(250)), Duration::from_millis(10))
        );
        assert_eq!(
            clamp_wait(&policy, 250, 60_000).1,
            Duration::from_millis(1_000)
        );

        let capped = QueuesConfig {
            max_get_timeout_ms: 500,
            ..policy
        };
        assert_eq!(clamp_wait(&capped, 0, -1).0, Some(Duration::from_millis(500)));
        assert_eq!(clamp_wait(&capped, 900, 0).0, Some(Duration::from_millis(500)));
    }

    #[test]
    fn put_then_get_delivers_by_priority() {
        let (context, _) = test_context(test_config());
        let (session, _client) = logged_in(&context, "admin", &["ADMINS"]);
        context
            .repository
            .define_queue("Q", 10, Disposition::Permanent, None)
            .expect("define should pass");

        assert_eq!(put(&context, "q", &Message::text("low").with_priority(1)).code, ResponseCode::Ok);
        assert_eq!(put(&context, "q", &Message::text("high").with_priority(8)).code, ResponseCode::Ok);

        let first = get(&context, &session, "Q", 10, 5);
        assert_eq!(first.code, ResponseCode::Ok);
        assert_eq!(
            first.delivered().map(|message| message.payload.clone()),
            Some(Message::text("high").payload)
        );
        let second = get(&context, &session, "Q", 10, 5);
        assert_eq!(
            second.delivered().map(|message| message.payload.clone()),
            Some(Message::text("low").payload)
        );
    }

    #[test]
    fn get_times_out_with_an_empty_delivery() {
        let (context, _) = test_context(test_config());
        let (session, _client) = logged_in(&context, "admin", &["ADMINS"]);
        context
            .repository
            .define_queue("EMPTY", 10, Disposition::Permanent, None)
            .expect("define should pass");

        let started = Instant::now();
        let response = get(&context, &session, "EMPTY", 60, 10);
        assert!(started.elapsed() >= Duration::from_millis(60));
        assert_eq!(response.code, ResponseCode::Ok);
        assert!(response.delivered().is_none());

        assert_eq!(get(&context, &session, "EMPTY", -1, 10).code, ResponseCode::Fail);
        assert_eq!(get(&context, &session, "NOPE", 10, 10).code, ResponseCode::Fail);
    }

    #[test]
    fn get_delivers_a_put_arriving_mid_wait() {
        let (context, _) = test_context(test_config());
        let (session, _client) = logged_in(&context, "admin", &["ADMINS"]);
        context
            .repository
            .define_queue("LATE", 10, Disposition::Permanent, None)
            .expect("define should pass");

        let producer = {
            let context = Arc::clone(&context);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(350));
                put(&context, "LATE", &Message::text("late arrival")).code
            })
        };
        let started = Instant::now();
        let response = get(&context, &session, "LATE", 500, 100);
        let elapsed = started.elapsed();

        assert_eq!(producer.join().expect("producer should finish"), ResponseCode::Ok);
        assert_eq!(response.code, ResponseCode::Ok);
        assert_eq!(
            response.delivered().map(|message| message.payload.clone()),
            Some(Message::text("late arrival").payload)
        );
        assert!(elapsed >= Duration::from_millis(300), "returned after {elapsed:?}");
        assert!(elapsed < Duration::from_millis(500), "returned after {elapsed:?}");
    }

    #[test]
    fn get_on_empty_queue_returns_within_one_interval_of_the_timeout() {
        let (context, _) = test_context(test_config());
        let (session, _client) = logged_in(&context, "admin", &["ADMINS"]);
        context
            .repository
            .define_queue("IDLE", 10, Disposition::Permanent, None)
            .expect("define should pass");

        let started = Instant::now();
        let response = get(&context, &session, "IDLE", 500, 100);
        let elapsed = started.elapsed();

        assert_eq!(response.code, ResponseCode::Ok);
        assert!(response.delivered().is_none());
        assert!(elapsed >= Duration::from_millis(400), "returned after {elapsed:?}");
        assert!(elapsed <= Duration::from_millis(600), "returned after {elapsed:?}");
    }

    #[test]
    fn blocked_get_notices_session_termination() {
        let (context, _) = test_context(test_config());
        let (session, _client) = logged_in(&context, "admin", &["ADMINS"]);
        context
            .repository
            .define_queue("WAIT", 10, Disposition::Permanent, None)
            .expect("define should pass");

        let waiter = {
            let context = Arc::clone(&context);
            let session = Arc::clone(&session);
            thread::spawn(move || get(&context, &session, "WAIT", 0, 10))
        };
        thread::sleep(Duration::from_millis(50));
        session.terminate();

        let response = waiter.join().expect("waiter should finish");
        assert!(response.delivered().is_none());
    }

    #[test]
    fn put_reports_suspension_and_refusal() {
        let (context, _) = test_context(test_config());
        context
            .repository
            .define_queue("CAP", 2, Disposition::Permanent, None)
            .expect("define should pass");

        assert_eq!(put(&context, "CAP", &Message::text("1")).code, ResponseCode::Ok);
        assert_eq!(put(&context, "CAP", &Message::text("2")).code, ResponseCode::Ok);

        let third = put(&context, "CAP", &Message::text("3"));
        assert_eq!(third.code, ResponseCode::Ok);
        assert!(third.reason.is_some_and(|reason| reason.contains("suspended")));

        let fourth = put(&context, "CAP", &Message::text("4"));
        assert_eq!(fourth.code, ResponseCode::Warn);
        assert_eq!(
            context.repository.get("CAP").expect("queue should exist").len(),
            3
        );
    }

    #[test]
    fn put_requires_a_data_body_and_an_existing_queue() {
        let (context, _) = test_context(test_config());
        let nested = Message::request(Request::Terminate {
            target: crate::wire::protocol::TerminateTarget::Server,
        });
        assert_eq!(put(&context, "Q", &nested).code, ResponseCode::Fail);
        assert_eq!(put(&context, "MISSING", &Message::text("x")).code, ResponseCode::Fail);
    }
}
