use crate::queues::{Disposition, QueueAlteration};
use crate::server::ServerContext;
use crate::wire::protocol::Response;
use crate::wire::session::Session;

use super::{validated_queue_name, validated_threshold};

/// DEFINE. An absent threshold takes `queues.default_threshold`; a TEMPORARY
/// queue is owned by the defining session.
pub fn define(
    context: &ServerContext,
    session: &Session,
    queue: &str,
    threshold: Option<i32>,
    disposition: Disposition,
) -> Response {
    let name = match validated_queue_name(queue) {
        Ok(name) => name,
        Err(response) => return response,
    };
    let threshold = match threshold {
        Some(raw) => match validated_threshold(raw) {
            Ok(threshold) => threshold,
            Err(response) => return response,
        },
        None => context.config.queues.default_threshold,
    };

    match context
        .repository
        .define_queue(&name, threshold, disposition, Some(session.id()))
    {
        Ok(_) => Response::ok(),
        Err(error) => Response::fail(error.to_string()),
    }
}

pub fn delete(context: &ServerContext, queue: &str, force: bool) -> Response {
    let name = match validated_queue_name(queue) {
        Ok(name) => name,
        Err(response) => return response,
    };

    match context.repository.delete_queue(&name, force) {
        Ok(_) => Response::ok(),
        Err(error) => Response::fail(error.to_string()),
    }
}

pub fn alter(
    context: &ServerContext,
    session: &Session,
    queue: &str,
    threshold: Option<i32>,
    disposition: Option<Disposition>,
) -> Response {
    let name = match validated_queue_name(queue) {
        Ok(name) => name,
        Err(response) => return response,
    };
    let threshold = match threshold.map(validated_threshold).transpose() {
        Ok(threshold) => threshold,
        Err(response) => return response,
    };

    let alteration = QueueAlteration {
        threshold,
        disposition,
        owner: Some(session.id()),
    };
    if alteration.is_empty() {
        return Response::fail("nothing to alter");
    }

    match context.repository.alter_queue(&name, alteration) {
        Ok(_) => Response::ok(),
        Err(error) => Response::fail(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use crate::message::Message;
    use crate::processors::tests::{logged_in, test_config, test_context};
    use crate::queues::Disposition;
    use crate::wire::protocol::ResponseCode;

    use super::{alter, define, delete};

    #[test]
    fn define_uses_default_threshold_and_rejects_duplicates() {
        let (context, _) = test_context(test_config());
        let (session, _client) = logged_in(&context, "admin", &["ADMINS"]);

        let response = define(&context, &session, "orders", None, Disposition::Permanent);
        assert_eq!(response.code, ResponseCode::Ok);
        let snapshot = context
            .repository
            .get("ORDERS")
            .expect("queue should exist")
            .snapshot();
        assert_eq!(snapshot.threshold, 100);
        assert_eq!(snapshot.owner, None);

        let duplicate = define(&context, &session, "Orders", Some(5), Disposition::Permanent);
        assert_eq!(duplicate.code, ResponseCode::Fail);
        assert!(duplicate
            .reason
            .is_some_and(|reason| reason.contains("already exists")));
    }

    #[test]
    fn define_validates_name_and_threshold() {
        let (context, _) = test_context(test_config());
        let (session, _client) = logged_in(&context, "admin", &["ADMINS"]);

        assert_eq!(
            define(&context, &session, "no spaces", None, Disposition::Permanent).code,
            ResponseCode::Fail
        );
        assert_eq!(
            define(&context, &session, "Q", Some(0), Disposition::Permanent).code,
            ResponseCode::Fail
        );
        assert!(context.repository.is_empty());
    }

    #[test]
    fn temporary_queues_are_owned_by_the_defining_session() {
        let (context, _) = test_context(test_config());
        let (session, _client) = logged_in(&context, "admin", &["ADMINS"]);

        define(&context, &session, "TMP", Some(3), Disposition::Temporary);
        let queue = context.repository.get("TMP").expect("queue should exist");
        assert_eq!(queue.owner(), Some(session.id()));
    }

    #[test]
    fn delete_requires_existing_and_empty_unless_forced() {
        let (context, _) = test_context(test_config());
        let (session, _client) = logged_in(&context, "admin", &["ADMINS"]);

        assert_eq!(delete(&context, "missing", false).code, ResponseCode::Fail);

        define(&context, &session, "Q", Some(5), Disposition::Permanent);
        context
            .repository
            .get("Q")
            .expect("queue should exist")
            .put(Message::text("pending"))
            .expect("put should pass");

        let refused = delete(&context, "Q", false);
        assert_eq!(refused.code, ResponseCode::Fail);
        assert!(refused
            .reason
            .is_some_and(|reason| reason.contains("not empty")));

        assert_eq!(delete(&context, "q", true).code, ResponseCode::Ok);
        assert!(context.repository.get("Q").is_none());
    }

    #[test]
    fn alter_needs_a_change_and_an_existing_queue() {
        let (context, _) = test_context(test_config());
        let (session, _client) = logged_in(&context, "admin", &["ADMINS"]);
        define(&context, &session, "Q", Some(5), Disposition::Permanent);

        let nothing = alter(&context, &session, "Q", None, None);
        assert_eq!(nothing.code, ResponseCode::Fail);
        assert_eq!(nothing.reason.as_deref(), Some("nothing to alter"));

        assert_eq!(
            alter(&context, &session, "Q", Some(-1), None).code,
            ResponseCode::Fail
        );
        assert_eq!(
            alter(&context, &session, "MISSING", Some(2), None).code,
            ResponseCode::Fail
        );

        let changed = alter(&context, &session, "q", Some(2), Some(Disposition::Temporary));
        assert_eq!(changed.code, ResponseCode::Ok);
        let snapshot = context
            .repository
            .get("Q")
            .expect("queue should exist")
            .snapshot();
        assert_eq!(snapshot.threshold, 2);
        assert_eq!(snapshot.disposition, Disposition::Temporary);
        assert_eq!(snapshot.owner, Some(session.id()));
    }
}
