use std::io::{self, Read};
use std::net::TcpStream;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::json;

use crate::logging::LogLevel;
use crate::message::Message;
use crate::processors;
use crate::server::{Connection, ServerContext};
use crate::shutdown::ShutdownSignal;
use crate::wire::codec::CodecError;
use crate::wire::fields::FrameReader;
use crate::wire::protocol::Response;

use super::Session;

/// Read half of a connection. Read timeouts are retried until the connection
/// is flagged for close or the server shuts down, which surfaces as
/// `ConnectionAborted`.
struct PollingStream {
    stream: TcpStream,
    connection: Arc<Connection>,
    shutdown: ShutdownSignal,
}

impl Read for PollingStream {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        loop {
            if !self.connection.is_open() || self.shutdown.is_triggered() {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionAborted,
                    "connection terminated",
                ));
            }
            match self.stream.read(out) {
                Err(error)
                    if matches!(
                        error.kind(),
                        io::ErrorKind::WouldBlock
                            | io::ErrorKind::TimedOut
                            | io::ErrorKind::Interrupted
                    ) => {}
                result => return result,
            }
        }
    }
}

/// Session handler body, run on the connection's own thread. Teardown runs
/// exactly once whichever way the loop ends, panics included.
pub fn run_session(context: Arc<ServerContext>, connection: Arc<Connection>) {
    let mut session: Option<Arc<Session>> = None;
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        serve_connection(&context, &connection, &mut session)
    }));

    let reason = outcome.unwrap_or_else(|_| {
        context.logger.log(
            LogLevel::Error,
            Some("session::runtime"),
            "Session handler panicked",
            Some(json!({"connection_id": connection.id().to_string()})),
        );
        "handler panicked".to_owned()
    });
    teardown(&context, &connection, session.as_ref(), &reason);
}

fn stop_requested(context: &ServerContext, connection: &Connection) -> bool {
    !connection.is_open() || context.shutdown.is_triggered()
}

/// Returns the reason the loop ended.
fn serve_connection(
    context: &ServerContext,
    connection: &Arc<Connection>,
    session: &mut Option<Arc<Session>>,
) -> String {
    let stream = match connection.reader() {
        Ok(stream) => stream,
        Err(error) => return format!("failed to open read half: {error}"),
    };
    let mut reader = FrameReader::new(PollingStream {
        stream,
        connection: Arc::clone(connection),
        shutdown: context.shutdown.clone(),
    });

    loop {
        let message = match context.codec.read(&mut reader) {
            Ok(Some(message)) => message,
            Ok(None) => {
                context.logger.log(
                    LogLevel::Warn,
                    Some("session::runtime"),
                    "Dropped frame of unregistered class",
                    Some(json!({"connection_id": connection.id().to_string()})),
                );
                continue;
            }
            Err(CodecError::ConnectionClosed) => return "peer closed connection".to_owned(),
            Err(_) if stop_requested(context, connection) => return "terminated".to_owned(),
            Err(error) if error.is_protocol() => {
                context.logger.log(
                    LogLevel::Warn,
                    Some("session::runtime"),
                    "Protocol error",
                    Some(json!({
                        "connection_id": connection.id().to_string(),
                        "error": error.to_string(),
                    })),
                );
                return format!("protocol error: {error}");
            }
            Err(error) => return format!("transport error: {error}"),
        };

        let active = match session {
            Some(active) => Arc::clone(active),
            None => match open_session(context, connection) {
                Some(created) => {
                    *session = Some(Arc::clone(&created));
                    created
                }
                None => return "connection no longer registered".to_owned(),
            },
        };
        if active.is_terminated() {
            return "terminated".to_owned();
        }

        active.record_request();
        let reply = processors::dispatch(context, &active, &message);
        if let Err(error) = write_reply(context, connection, &message, &reply) {
            return format!("transport error: {error}");
        }

        if active.is_terminated() || stop_requested(context, connection) {
            return "terminated".to_owned();
        }
    }
}

fn open_session(context: &ServerContext, connection: &Arc<Connection>) -> Option<Arc<Session>> {
    let session = Arc::new(Session::new(Arc::clone(connection)));
    if let Err(error) = context.registry.register_session(Arc::clone(&session)) {
        context.logger.warn(Some("session::runtime"), &error.to_string());
        return None;
    }

    context.logger.log(
        LogLevel::Info,
        Some("session::runtime"),
        "Session created",
        Some(json!({
            "session_id": session.id().to_string(),
            "connection_id": connection.id().to_string(),
            "address": connection.address().to_string(),
        })),
    );
    Some(session)
}

fn write_reply(
    context: &ServerContext,
    connection: &Connection,
    request: &Message,
    reply: &Message,
) -> Result<(), CodecError> {
    let frame = match context.codec.encode(reply) {
        Ok(frame) => frame,
        Err(error) => {
            context.logger.log(
                LogLevel::Error,
                Some("session::runtime"),
                "Failed to encode response",
                Some(json!({
                    "connection_id": connection.id().to_string(),
                    "error": error.to_string(),
                })),
            );
            let fallback = request.reply_to(Response::fail(format!(
                "response could not be encoded: {error}"
            )));
            context.codec.encode(&fallback)?
        }
    };
    connection.write_frame(&frame).map_err(CodecError::Transport)
}

/// Releases the session and connection. Safe to call more than once; each
/// registry entry is removed and logged only by the first caller.
pub fn teardown(
    context: &ServerContext,
    connection: &Connection,
    session: Option<&Arc<Session>>,
    reason: &str,
) {
    if let Some(session) = session {
        session.terminate();
        if context.registry.remove_session(session.id()).is_some() {
            context.logger.log(
                LogLevel::Info,
                Some("session::runtime"),
                "Session terminated",
                Some(json!({
                    "session_id": session.id().to_string(),
                    "requests": session.request_count(),
                    "reason": reason,
                })),
            );
        }
    }

    connection.shutdown();
    if context.registry.remove_connection(connection.id()).is_some() {
        context.logger.log(
            LogLevel::Info,
            Some("session::runtime"),
            "Connection closed",
            Some(json!({
                "connection_id": connection.id().to_string(),
                "address": connection.address().to_string(),
                "reason": reason,
            })),
        );
    }
}
