pub mod properties;

use std::fmt;

use uuid::Uuid;

use crate::wire::protocol::{Request, Response};

pub use properties::{Properties, PropertyValue};

pub const DEFAULT_PRIORITY: u8 = 4;
pub const MAX_PRIORITY: u8 = 9;

/// Body of a message. Data bodies travel through queues; requests and
/// responses only travel between a client and its session.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Text(String),
    Bytes(Vec<u8>),
    Object(rmpv::Value),
    Map(Properties),
    Stream(Vec<PropertyValue>),
    Request(Request),
    Response(Response),
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Object(_) => "object",
            Self::Map(_) => "map",
            Self::Stream(_) => "stream",
            Self::Request(request) => request.verb(),
            Self::Response(_) => "response",
        }
    }

    pub fn is_data(&self) -> bool {
        !matches!(self, Self::Request(_) | Self::Response(_))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub correlation_id: Option<Uuid>,
    pub priority: u8,
    pub properties: Properties,
    pub payload: Payload,
}

impl Message {
    pub fn new(payload: Payload) -> Self {
        Self {
            id: Uuid::new_v4(),
            correlation_id: None,
            priority: DEFAULT_PRIORITY,
            properties: Properties::new(),
            payload,
        }
    }

    pub fn text(body: impl Into<String>) -> Self {
        Self::new(Payload::Text(body.into()))
    }

    pub fn bytes(body: impl Into<Vec<u8>>) -> Self {
        Self::new(Payload::Bytes(body.into()))
    }

    pub fn object(body: rmpv::Value) -> Self {
        Self::new(Payload::Object(body))
    }

    pub fn map(body: Properties) -> Self {
        Self::new(Payload::Map(body))
    }

    pub fn stream(body: Vec<PropertyValue>) -> Self {
        Self::new(Payload::Stream(body))
    }

    pub fn request(request: Request) -> Self {
        Self::new(Payload::Request(request))
    }

    /// Priorities above 9 are clamped to 9.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(MAX_PRIORITY);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.set(key, value);
        self
    }

    /// Builds the response to `self`, correlated by this message's id.
    pub fn reply_to(&self, response: Response) -> Self {
        Self {
            correlation_id: Some(self.id),
            ..Self::new(Payload::Response(response))
        }
    }

    pub fn is_data(&self) -> bool {
        self.payload.is_data()
    }

    pub fn as_request(&self) -> Option<&Request> {
        match &self.payload {
            Payload::Request(request) => Some(request),
            _ => None,
        }
    }

    pub fn as_response(&self) -> Option<&Response> {
        match &self.payload {
            Payload::Response(response) => Some(response),
            _ => None,
        }
    }

    pub fn into_response(self) -> Option<Response> {
        match self.payload {
            Payload::Response(response) => Some(response),
            _ => None,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[id={}, priority={}, properties={}]",
            self.payload.kind(),
            self.id,
            self.priority,
            self.properties.len()
        )
    }
}
