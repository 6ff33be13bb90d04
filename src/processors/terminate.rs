use serde_json::json;
use uuid::Uuid;

use crate::logging::LogLevel;
use crate::server::ServerContext;
use crate::wire::protocol::{Response, TerminateTarget};
use crate::wire::session::Session;

fn parse_id(raw: &str) -> Result<Uuid, Response> {
    Uuid::parse_str(raw.trim()).map_err(|_| Response::fail(format!("invalid id '{raw}'")))
}

/// TERMINATE. Targets are flagged here and torn down by their own handler, so
/// a session terminating itself still receives this OK.
pub fn process(context: &ServerContext, session: &Session, target: &TerminateTarget) -> Response {
    let terminated = match target {
        TerminateTarget::Connection(raw) => {
            let id = match parse_id(raw) {
                Ok(id) => id,
                Err(response) => return response,
            };
            let Some(connection) = context.registry.connection(id) else {
                return Response::fail(format!("unknown connection {id}"));
            };
            if let Some(owner) = context.registry.session_for_connection(id) {
                owner.terminate();
            }
            connection.request_close();
            id.to_string()
        }
        TerminateTarget::Session(raw) => {
            let id = match parse_id(raw) {
                Ok(id) => id,
                Err(response) => return response,
            };
            let Some(target) = context.registry.session(id) else {
                return Response::fail(format!("unknown session {id}"));
            };
            target.terminate();
            id.to_string()
        }
        TerminateTarget::Server => {
            context.shutdown.trigger();
            "server".to_owned()
        }
    };

    context.logger.log(
        LogLevel::Info,
        Some("processors::terminate"),
        "Termination requested",
        Some(json!({
            "target": target.name(),
            "id": terminated,
            "requested_by": session.id().to_string(),
        })),
    );
    Response::ok()
}
