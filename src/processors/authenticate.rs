use serde_json::json;

use crate::logging::LogLevel;
use crate::server::ServerContext;
use crate::wire::protocol::Response;
use crate::wire::session::Session;

pub fn process(context: &ServerContext, session: &Session, user: &str, password: &str) -> Response {
    if user.trim().is_empty() {
        return Response::fail("user name is required");
    }
    if let Some(current) = session.user() {
        return Response::fail(format!("already authenticated as '{}'", current.name));
    }

    let Some(entity) = context.access.authenticate(user.trim(), password) else {
        context.logger.log(
            LogLevel::Warn,
            Some("processors::authenticate"),
            "Authentication failed",
            Some(json!({
                "session_id": session.id().to_string(),
                "user": user,
                "address": session.connection().address().to_string(),
            })),
        );
        return Response::fail("bad credentials");
    };

    if let Err(error) = session.authenticate(entity.clone()) {
        return Response::fail(error.to_string());
    }

    context.logger.log(
        LogLevel::Info,
        Some("processors::authenticate"),
        "Session authenticated",
        Some(json!({
            "session_id": session.id().to_string(),
            "user": entity.name,
            "groups": entity.groups,
        })),
    );
    Response::ok()
}
