use std::fmt;
use std::io::Cursor;

use crate::message::{Message, Payload};
use crate::queues::Disposition;
use crate::wire::codec::{CodecError, DecoderRegistry};
use crate::wire::fields::{FieldReader, FieldWriter};

pub const CLASS_TEXT: u32 = 1;
pub const CLASS_BYTES: u32 = 2;
pub const CLASS_OBJECT: u32 = 3;
pub const CLASS_MAP: u32 = 4;
pub const CLASS_STREAM: u32 = 5;

pub const CLASS_AUTHENTICATE: u32 = 100;
pub const CLASS_DEFINE: u32 = 101;
pub const CLASS_DELETE: u32 = 102;
pub const CLASS_ALTER: u32 = 103;
pub const CLASS_GET: u32 = 104;
pub const CLASS_PUT: u32 = 105;
pub const CLASS_QUERY: u32 = 106;
pub const CLASS_TERMINATE: u32 = 107;

pub const CLASS_STATUS: u32 = 200;
pub const CLASS_DELIVERY: u32 = 201;
pub const CLASS_REPORT: u32 = 202;

/// Classes that may be embedded in a PUT or a delivery.
pub fn is_data_class(class_id: u32) -> bool {
    (CLASS_TEXT..=CLASS_STREAM).contains(&class_id)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryKind {
    Config,
    Connection,
    Session,
    Queue,
    Group,
    User,
}

impl QueryKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Config => "CONFIG",
            Self::Connection => "CONNECTION",
            Self::Session => "SESSION",
            Self::Queue => "QUEUE",
            Self::Group => "GROUP",
            Self::User => "USER",
        }
    }

    fn tag(self) -> u8 {
        match self {
            Self::Config => 0,
            Self::Connection => 1,
            Self::Session => 2,
            Self::Queue => 3,
            Self::Group => 4,
            Self::User => 5,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Config),
            1 => Some(Self::Connection),
            2 => Some(Self::Session),
            3 => Some(Self::Queue),
            4 => Some(Self::Group),
            5 => Some(Self::User),
            _ => None,
        }
    }
}

/// Target of a TERMINATE request. Ids are carried as text and parsed by the
/// processor so a malformed id is a validation failure, not a protocol error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TerminateTarget {
    Connection(String),
    Session(String),
    Server,
}

impl TerminateTarget {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connection(_) => "CONNECTION",
            Self::Session(_) => "SESSION",
            Self::Server => "SERVER",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Request {
    Authenticate {
        user: String,
        password: String,
    },
    Define {
        queue: String,
        threshold: Option<i32>,
        disposition: Disposition,
    },
    Delete {
        queue: String,
        force: bool,
    },
    Alter {
        queue: String,
        threshold: Option<i32>,
        disposition: Option<Disposition>,
    },
    /// `timeout_ms == 0` waits indefinitely; `poll_interval_ms <= 0` selects the
    /// server default.
    Get {
        queue: String,
        timeout_ms: i64,
        poll_interval_ms: i64,
    },
    Put {
        queue: String,
        message: Box<Message>,
    },
    Query {
        kind: QueryKind,
        filter: String,
        all_data: bool,
    },
    Terminate {
        target: TerminateTarget,
    },
}

impl Request {
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Authenticate { .. } => "AUTHENTICATE",
            Self::Define { .. } => "DEFINE",
            Self::Delete { .. } => "DELETE",
            Self::Alter { .. } => "ALTER",
            Self::Get { .. } => "GET",
            Self::Put { .. } => "PUT",
            Self::Query { .. } => "QUERY",
            Self::Terminate { .. } => "TERMINATE",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseCode {
    Ok,
    Fail,
    Warn,
    Error,
}

impl ResponseCode {
    pub fn value(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::Fail => -1,
            Self::Warn => 1,
            Self::Error => -2,
        }
    }

    pub fn from_value(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Ok),
            -1 => Some(Self::Fail),
            1 => Some(Self::Warn),
            -2 => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Ok => "OK",
            Self::Fail => "FAIL",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        };
        write!(f, "{label}")
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ResponseBody {
    Status,
    Delivery(Option<Box<Message>>),
    Report(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub code: ResponseCode,
    pub reason: Option<String>,
    pub body: ResponseBody,
}

impl Response {
    fn status(code: ResponseCode, reason: Option<String>) -> Self {
        Self {
            code,
            reason,
            body: ResponseBody::Status,
        }
    }

    pub fn ok() -> Self {
        Self::status(ResponseCode::Ok, None)
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self::status(ResponseCode::Fail, Some(reason.into()))
    }

    pub fn warn(reason: impl Into<String>) -> Self {
        Self::status(ResponseCode::Warn, Some(reason.into()))
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self::status(ResponseCode::Error, Some(reason.into()))
    }

    pub fn delivery(message: Option<Message>) -> Self {
        Self {
            code: ResponseCode::Ok,
            reason: None,
            body: ResponseBody::Delivery(message.map(Box::new)),
        }
    }

    pub fn report(code: ResponseCode, text: impl Into<String>) -> Self {
        Self {
            code,
            reason: None,
            body: ResponseBody::Report(text.into()),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn delivered(&self) -> Option<&Message> {
        match &self.body {
            ResponseBody::Delivery(message) => message.as_deref(),
            _ => None,
        }
    }

    pub fn report_text(&self) -> Option<&str> {
        match &self.body {
            ResponseBody::Report(text) => Some(text),
            _ => None,
        }
    }
}

pub fn class_id(payload: &Payload) -> u32 {
    match payload {
        Payload::Text(_) => CLASS_TEXT,
        Payload::Bytes(_) => CLASS_BYTES,
        Payload::Object(_) => CLASS_OBJECT,
        Payload::Map(_) => CLASS_MAP,
        Payload::Stream(_) => CLASS_STREAM,
        Payload::Request(request) => match request {
            Request::Authenticate { .. } => CLASS_AUTHENTICATE,
            Request::Define { .. } => CLASS_DEFINE,
            Request::Delete { .. } => CLASS_DELETE,
            Request::Alter { .. } => CLASS_ALTER,
            Request::Get { .. } => CLASS_GET,
            Request::Put { .. } => CLASS_PUT,
            Request::Query { .. } => CLASS_QUERY,
            Request::Terminate { .. } => CLASS_TERMINATE,
        },
        Payload::Response(response) => match response.body {
            ResponseBody::Status => CLASS_STATUS,
            ResponseBody::Delivery(_) => CLASS_DELIVERY,
            ResponseBody::Report(_) => CLASS_REPORT,
        },
    }
}

/// Registry holding a decoder for every class this server speaks.
pub fn standard_registry() -> DecoderRegistry {
    let mut registry = DecoderRegistry::new();
    registry.register(CLASS_TEXT, decode_text);
    registry.register(CLASS_BYTES, decode_bytes);
    registry.register(CLASS_OBJECT, decode_object);
    registry.register(CLASS_MAP, decode_map);
    registry.register(CLASS_STREAM, decode_stream);
    registry.register(CLASS_AUTHENTICATE, decode_authenticate);
    registry.register(CLASS_DEFINE, decode_define);
    registry.register(CLASS_DELETE, decode_delete);
    registry.register(CLASS_ALTER, decode_alter);
    registry.register(CLASS_GET, decode_get);
    registry.register(CLASS_PUT, decode_put);
    registry.register(CLASS_QUERY, decode_query);
    registry.register(CLASS_TERMINATE, decode_terminate);
    registry.register(CLASS_STATUS, decode_status);
    registry.register(CLASS_DELIVERY, decode_delivery);
    registry.register(CLASS_REPORT, decode_report);
    registry
}

pub(crate) fn write_payload(writer: &mut FieldWriter, payload: &Payload) -> Result<(), CodecError> {
    match payload {
        Payload::Text(body) => writer.put_string("body", body),
        Payload::Bytes(body) => writer.put_bytes("body", body),
        Payload::Object(value) => {
            let mut encoded = Vec::new();
            rmpv::encode::write_value(&mut encoded, value).map_err(CodecError::ObjectEncode)?;
            writer.put_bytes("body", &encoded)
        }
        Payload::Map(entries) => writer.put_properties("body", entries),
        Payload::Stream(values) => writer.put_value_list("body", values),
        Payload::Request(request) => write_request(writer, request),
        Payload::Response(response) => write_response(writer, response),
    }
}

fn write_request(writer: &mut FieldWriter, request: &Request) -> Result<(), CodecError> {
    match request {
        Request::Authenticate { user, password } => {
            writer.put_string("user", user)?;
            writer.put_string("password", password)
        }
        Request::Define {
            queue,
            threshold,
            disposition,
        } => {
            writer.put_string("queue", queue)?;
            writer.put_optional_i32(*threshold);
            writer.put_u8(disposition_tag(*disposition));
            Ok(())
        }
        Request::Delete { queue, force } => {
            writer.put_string("queue", queue)?;
            writer.put_bool(*force);
            Ok(())
        }
        Request::Alter {
            queue,
            threshold,
            disposition,
        } => {
            writer.put_string("queue", queue)?;
            writer.put_optional_i32(*threshold);
            writer.put_bool(disposition.is_some());
            if let Some(disposition) = disposition {
                writer.put_u8(disposition_tag(*disposition));
            }
            Ok(())
        }
        Request::Get {
            queue,
            timeout_ms,
            poll_interval_ms,
        } => {
            writer.put_string("queue", queue)?;
            writer.put_i64(*timeout_ms);
            writer.put_i64(*poll_interval_ms);
            Ok(())
        }
        Request::Put { queue, message } => {
            writer.put_string("queue", queue)?;
            writer.put_message(message)
        }
        Request::Query {
            kind,
            filter,
            all_data,
        } => {
            writer.put_u8(kind.tag());
            writer.put_string("filter", filter)?;
            writer.put_bool(*all_data);
            Ok(())
        }
        Request::Terminate { target } => match target {
            TerminateTarget::Connection(id) => {
                writer.put_u8(0);
                writer.put_string("target", id)
            }
            TerminateTarget::Session(id) => {
                writer.put_u8(1);
                writer.put_string("target", id)
            }
            TerminateTarget::Server => {
                writer.put_u8(2);
                Ok(())
            }
        },
    }
}

fn write_response(writer: &mut FieldWriter, response: &Response) -> Result<(), CodecError> {
    writer.put_i32(response.code.value());
    writer.put_optional_string("reason", response.reason.as_deref())?;
    match &response.body {
        ResponseBody::Status => Ok(()),
        ResponseBody::Delivery(message) => {
            writer.put_bool(message.is_some());
            match message {
                Some(message) => writer.put_message(message),
                None => Ok(()),
            }
        }
        ResponseBody::Report(text) => writer.put_string("report", text),
    }
}

fn disposition_tag(disposition: Disposition) -> u8 {
    match disposition {
        Disposition::Permanent => 0,
        Disposition::Temporary => 1,
    }
}

fn read_disposition(reader: &mut FieldReader<'_>) -> Result<Disposition, CodecError> {
    match reader.read_u8()? {
        0 => Ok(Disposition::Permanent),
        1 => Ok(Disposition::Temporary),
        tag => Err(CodecError::InvalidTag {
            field: "disposition",
            tag,
        }),
    }
}

fn decode_text(reader: &mut FieldReader<'_>) -> Result<Payload, CodecError> {
    reader.read_string("body").map(Payload::Text)
}

fn decode_bytes(reader: &mut FieldReader<'_>) -> Result<Payload, CodecError> {
    reader.read_bytes("body").map(Payload::Bytes)
}

fn decode_object(reader: &mut FieldReader<'_>) -> Result<Payload, CodecError> {
    let encoded = reader.read_bytes("body")?;
    let mut cursor = Cursor::new(encoded.as_slice());
    let value = rmpv::decode::read_value(&mut cursor).map_err(CodecError::ObjectDecode)?;
    if cursor.position() as usize != encoded.len() {
        return Err(CodecError::TrailingObjectData);
    }
    Ok(Payload::Object(value))
}

fn decode_map(reader: &mut FieldReader<'_>) -> Result<Payload, CodecError> {
    reader.read_properties("body").map(Payload::Map)
}

fn decode_stream(reader: &mut FieldReader<'_>) -> Result<Payload, CodecError> {
    reader.read_value_list("body").map(Payload::Stream)
}

fn decode_authenticate(reader: &mut FieldReader<'_>) -> Result<Payload, CodecError> {
    let user = reader.read_string("user")?;
    let password = reader.read_string("password")?;
    Ok(Payload::Request(Request::Authenticate { user, password }))
}

fn decode_define(reader: &mut FieldReader<'_>) -> Result<Payload, CodecError> {
    let queue = reader.read_string("queue")?;
    let threshold = reader.read_optional_i32("threshold")?;
    let disposition = read_disposition(reader)?;
    Ok(Payload::Request(Request::Define {
        queue,
        threshold,
        disposition,
    }))
}

fn decode_delete(reader: &mut FieldReader<'_>) -> Result<Payload, CodecError> {
    let queue = reader.read_string("queue")?;
    let force = reader.read_bool("force")?;
    Ok(Payload::Request(Request::Delete { queue, force }))
}

fn decode_alter(reader: &mut FieldReader<'_>) -> Result<Payload, CodecError> {
    let queue = reader.read_string("queue")?;
    let threshold = reader.read_optional_i32("threshold")?;
    let disposition = if reader.read_bool("disposition")? {
        Some(read_disposition(reader)?)
    } else {
        None
    };
    Ok(Payload::Request(Request::Alter {
        queue,
        threshold,
        disposition,
    }))
}

fn decode_get(reader: &mut FieldReader<'_>) -> Result<Payload, CodecError> {
    let queue = reader.read_string("queue")?;
    let timeout_ms = reader.read_i64()?;
    let poll_interval_ms = reader.read_i64()?;
    Ok(Payload::Request(Request::Get {
        queue,
        timeout_ms,
        poll_interval_ms,
    }))
}

fn decode_put(reader: &mut FieldReader<'_>) -> Result<Payload, CodecError> {
    let queue = reader.read_string("queue")?;
    let message = reader.read_message()?;
    Ok(Payload::Request(Request::Put {
        queue,
        message: Box::new(message),
    }))
}

fn decode_query(reader: &mut FieldReader<'_>) -> Result<Payload, CodecError> {
    let tag = reader.read_u8()?;
    let kind = QueryKind::from_tag(tag).ok_or(CodecError::InvalidTag { field: "kind", tag })?;
    let filter = reader.read_string("filter")?;
    let all_data = reader.read_bool("all_data")?;
    Ok(Payload::Request(Request::Query {
        kind,
        filter,
        all_data,
    }))
}

fn decode_terminate(reader: &mut FieldReader<'_>) -> Result<Payload, CodecError> {
    let target = match reader.read_u8()? {
        0 => TerminateTarget::Connection(reader.read_string("target")?),
        1 => TerminateTarget::Session(reader.read_string("target")?),
        2 => TerminateTarget::Server,
        tag => return Err(CodecError::InvalidTag { field: "target", tag }),
    };
    Ok(Payload::Request(Request::Terminate { target }))
}

fn read_response_head(
    reader: &mut FieldReader<'_>,
) -> Result<(ResponseCode, Option<String>), CodecError> {
    let value = reader.read_i32()?;
    let code = ResponseCode::from_value(value).ok_or(CodecError::InvalidResponseCode { value })?;
    let reason = reader.read_optional_string("reason")?;
    Ok((code, reason))
}

fn decode_status(reader: &mut FieldReader<'_>) -> Result<Payload, CodecError> {
    let (code, reason) = read_response_head(reader)?;
    Ok(Payload::Response(Response {
        code,
        reason,
        body: ResponseBody::Status,
    }))
}

fn decode_delivery(reader: &mut FieldReader<'_>) -> Result<Payload, CodecError> {
    let (code, reason) = read_response_head(reader)?;
    let message = if reader.read_bool("delivery")? {
        Some(Box::new(reader.read_message()?))
    } else {
        None
    };
    Ok(Payload::Response(Response {
        code,
        reason,
        body: ResponseBody::Delivery(message),
    }))
}

fn decode_report(reader: &mut FieldReader<'_>) -> Result<Payload, CodecError> {
    let (code, reason) = read_response_head(reader)?;
    let text = reader.read_string("report")?;
    Ok(Payload::Response(Response {
        code,
        reason,
        body: ResponseBody::Report(text),
    }))
}
