use chrono::{DateTime, SecondsFormat, Utc};

use crate::server::ServerContext;
use crate::utils::pattern::NamePattern;
use crate::wire::protocol::{QueryKind, Response, ResponseCode};

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// QUERY. One report line per match; zero matches answer WARN with an empty
/// report.
pub fn process(context: &ServerContext, kind: QueryKind, filter: &str, all_data: bool) -> Response {
    let Some(pattern) = NamePattern::parse(filter) else {
        return Response::fail(format!(
            "invalid filter '{filter}': expected a name, 'prefix*' or '*'"
        ));
    };

    let lines = match kind {
        QueryKind::Config => config_lines(context, &pattern),
        QueryKind::Connection => connection_lines(context, &pattern, all_data),
        QueryKind::Session => session_lines(context, &pattern, all_data),
        QueryKind::Queue => queue_lines(context, &pattern, all_data),
        QueryKind::Group => group_lines(context, &pattern, all_data),
        QueryKind::User => user_lines(context, &pattern, all_data),
    };

    if lines.is_empty() {
        return Response::report(ResponseCode::Warn, "")
            .with_reason(format!("no {} matches '{filter}'", kind.name()));
    }
    Response::report(ResponseCode::Ok, lines.join("\n"))
}

fn config_lines(context: &ServerContext, pattern: &NamePattern) -> Vec<String> {
    context
        .config
        .flattened()
        .into_iter()
        .filter(|(key, _)| pattern.matches(key))
        .map(|(key, value)| format!("{key} = {value}"))
        .collect()
}

fn connection_lines(context: &ServerContext, pattern: &NamePattern, all_data: bool) -> Vec<String> {
    context
        .registry
        .connections()
        .into_iter()
        .filter(|connection| pattern.matches(&connection.id().to_string()))
        .map(|connection| {
            let mut line = format!("{} {}", connection.id(), connection.address());
            if all_data {
                let session = context
                    .registry
                    .session_for_connection(connection.id())
                    .map(|session| session.id().to_string())
                    .unwrap_or_else(|| "-".to_owned());
                line.push_str(&format!(
                    " connected_at={} open={} session={session}",
                    timestamp(connection.connected_at()),
                    connection.is_open(),
                ));
            }
            line
        })
        .collect()
}

fn session_lines(context: &ServerContext, pattern: &NamePattern, all_data: bool) -> Vec<String> {
    context
        .registry
        .session_snapshots()
        .into_iter()
        .filter(|session| pattern.matches(&session.id.to_string()))
        .map(|session| {
            let mut line = format!(
                "{} {} {}",
                session.id,
                session.state,
                session.user.as_deref().unwrap_or("-")
            );
            if all_data {
                line.push_str(&format!(
                    " connection={} address={} created_at={} last_request_at={} requests={}",
                    session.connection_id,
                    session.address,
                    timestamp(session.created_at),
                    session
                        .last_request_at
                        .map(timestamp)
                        .unwrap_or_else(|| "-".to_owned()),
                    session.requests,
                ));
            }
            line
        })
        .collect()
}

fn queue_lines(context: &ServerContext, pattern: &NamePattern, all_data: bool) -> Vec<String> {
    context
        .repository
        .matching(pattern)
        .into_iter()
        .map(|queue| {
            let snapshot = queue.snapshot();
            let mut line = format!(
                "{} {}/{} {}",
                snapshot.name,
                snapshot.size,
                snapshot.threshold,
                snapshot.disposition.name()
            );
            if snapshot.suspended {
                line.push_str(" SUSPENDED");
            }
            if all_data {
                line.push_str(&format!(
                    " created_at={} owner={}",
                    timestamp(snapshot.created_at),
                    snapshot
                        .owner
                        .map(|owner| owner.to_string())
                        .unwrap_or_else(|| "-".to_owned()),
                ));
            }
            line
        })
        .collect()
}

fn group_lines(context: &ServerContext, pattern: &NamePattern, all_data: bool) -> Vec<String> {
    context
        .access
        .groups()
        .into_iter()
        .filter(|group| pattern.matches(&group.name))
        .map(|group| match (&group.description, all_data) {
            (Some(description), true) => format!("{} {description}", group.name),
            _ => group.name,
        })
        .collect()
}

fn user_lines(context: &ServerContext, pattern: &NamePattern, all_data: bool) -> Vec<String> {
    context
        .access
        .users()
        .into_iter()
        .filter(|user| pattern.matches(&user.name))
        .map(|user| {
            if all_data {
                format!("{} groups={}", user.name, user.groups.join(","))
            } else {
                user.name
            }
        })
        .collect()
}
