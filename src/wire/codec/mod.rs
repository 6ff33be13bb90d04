use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read, Write};

use bytes::Bytes;

use crate::message::{Message, Payload, MAX_PRIORITY};
use crate::wire::fields::{FieldReader, FieldWriter, FrameReader};
use crate::wire::protocol;

pub const EYE_CATCHER: &[u8; 3] = b"KAS";
pub const FRAME_HEADER_SIZE_BYTES: usize = EYE_CATCHER.len() + 4;

pub type Decoder = fn(&mut FieldReader<'_>) -> Result<Payload, CodecError>;

#[derive(Debug)]
pub enum CodecError {
    ConnectionClosed,
    Transport(io::Error),
    HeaderVerificationFailed { found: [u8; 3] },
    Truncated,
    InvalidUtf8 { field: &'static str },
    InvalidTag { field: &'static str, tag: u8 },
    InvalidPriority { value: u8 },
    InvalidResponseCode { value: i32 },
    FieldTooLarge {
        field: &'static str,
        size: usize,
        limit: usize,
    },
    UnknownNestedClass { class_id: u32 },
    NestedNonDataClass { class_id: u32 },
    ObjectEncode(rmpv::encode::Error),
    ObjectDecode(rmpv::decode::Error),
    TrailingObjectData,
}

impl CodecError {
    /// Malformed input from the peer. The connection cannot be trusted to stay
    /// aligned on frame boundaries after one of these.
    pub fn is_protocol(&self) -> bool {
        !matches!(
            self,
            Self::ConnectionClosed | Self::Transport(_) | Self::ObjectEncode(_)
        )
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionClosed => write!(f, "connection closed by peer"),
            Self::Transport(source) => write!(f, "transport error: {source}"),
            Self::HeaderVerificationFailed { found } => write!(
                f,
                "protocol error: header verification failed (found {:02x?})",
                found
            ),
            Self::Truncated => write!(f, "protocol error: frame truncated"),
            Self::InvalidUtf8 { field } => {
                write!(f, "protocol error: field '{field}' is not valid UTF-8")
            }
            Self::InvalidTag { field, tag } => {
                write!(f, "protocol error: field '{field}' has invalid tag {tag}")
            }
            Self::InvalidPriority { value } => write!(
                f,
                "protocol error: priority {value} outside 0..={MAX_PRIORITY}"
            ),
            Self::InvalidResponseCode { value } => {
                write!(f, "protocol error: unknown response code {value}")
            }
            Self::FieldTooLarge { field, size, limit } => write!(
                f,
                "field '{field}' size {size} exceeds limit {limit}"
            ),
            Self::UnknownNestedClass { class_id } => write!(
                f,
                "protocol error: embedded frame has unregistered class id {class_id}"
            ),
            Self::NestedNonDataClass { class_id } => write!(
                f,
                "protocol error: embedded frame must carry data, found class id {class_id}"
            ),
            Self::ObjectEncode(source) => write!(f, "messagepack encode error: {source}"),
            Self::ObjectDecode(source) => write!(f, "messagepack decode error: {source}"),
            Self::TrailingObjectData => {
                write!(f, "protocol error: object body contains trailing data")
            }
        }
    }
}

impl std::error::Error for CodecError {}

/// Class id to decoder table. Built once at startup and handed to the codec;
/// adding a message kind means registering one more decoder.
#[derive(Clone, Default)]
pub struct DecoderRegistry {
    decoders: HashMap<u32, Decoder>,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the decoder previously registered for `class_id`, if any.
    pub fn register(&mut self, class_id: u32, decoder: Decoder) -> Option<Decoder> {
        self.decoders.insert(class_id, decoder)
    }

    pub fn lookup(&self, class_id: u32) -> Option<Decoder> {
        self.decoders.get(&class_id).copied()
    }

    pub fn class_ids(&self) -> Vec<u32> {
        let mut ids = self.decoders.keys().copied().collect::<Vec<_>>();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }
}

impl fmt::Debug for DecoderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderRegistry")
            .field("class_ids", &self.class_ids())
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct WireCodec {
    registry: DecoderRegistry,
}

impl WireCodec {
    pub fn new(registry: DecoderRegistry) -> Self {
        Self { registry }
    }

    /// Codec with every built-in data, request and response class.
    pub fn standard() -> Self {
        Self::new(protocol::standard_registry())
    }

    pub fn registry(&self) -> &DecoderRegistry {
        &self.registry
    }

    pub fn encode(&self, message: &Message) -> Result<Bytes, CodecError> {
        let mut writer = FieldWriter::new();
        write_message_fields(&mut writer, message)?;
        Ok(writer.freeze())
    }

    pub fn write<W: Write>(&self, writer: &mut W, message: &Message) -> Result<(), CodecError> {
        let frame = self.encode(message)?;
        writer.write_all(&frame).map_err(CodecError::Transport)?;
        writer.flush().map_err(CodecError::Transport)
    }

    /// Reads one frame. `Ok(None)` means a frame of an unregistered class was
    /// dropped; the reader is left positioned on the next eye-catcher.
    pub fn read<R: Read>(&self, reader: &mut FrameReader<R>) -> Result<Option<Message>, CodecError> {
        let mut header = [0_u8; FRAME_HEADER_SIZE_BYTES];
        read_frame_start(reader, &mut header)?;

        if &header[..EYE_CATCHER.len()] != EYE_CATCHER {
            return Err(CodecError::HeaderVerificationFailed {
                found: [header[0], header[1], header[2]],
            });
        }

        let class_id = u32::from_be_bytes([header[3], header[4], header[5], header[6]]);
        if self.registry.lookup(class_id).is_none() {
            skip_to_next_frame(reader)?;
            return Ok(None);
        }

        let mut fields = FieldReader::new(reader, &self.registry);
        read_message_body(&mut fields, class_id).map(Some)
    }

    pub fn decode_slice(&self, frame: &[u8]) -> Result<Option<Message>, CodecError> {
        self.read(&mut FrameReader::new(frame))
    }
}

pub(crate) fn write_message_fields(
    writer: &mut FieldWriter,
    message: &Message,
) -> Result<(), CodecError> {
    writer.put_raw(EYE_CATCHER);
    writer.put_u32(protocol::class_id(&message.payload));
    writer.put_uuid(message.id);
    writer.put_optional_uuid(message.correlation_id);
    writer.put_u8(message.priority.min(MAX_PRIORITY));
    writer.put_properties("properties", &message.properties)?;
    protocol::write_payload(writer, &message.payload)
}

pub(crate) fn read_header(reader: &mut FieldReader<'_>) -> Result<u32, CodecError> {
    let mut eye_catcher = [0_u8; 3];
    reader.read_exact(&mut eye_catcher)?;
    if &eye_catcher != EYE_CATCHER {
        return Err(CodecError::HeaderVerificationFailed { found: eye_catcher });
    }
    reader.read_u32()
}

pub(crate) fn read_message_body(
    reader: &mut FieldReader<'_>,
    class_id: u32,
) -> Result<Message, CodecError> {
    let decoder = reader
        .registry()
        .lookup(class_id)
        .ok_or(CodecError::UnknownNestedClass { class_id })?;

    let id = reader.read_uuid()?;
    let correlation_id = reader.read_optional_uuid()?;
    let priority = reader.read_u8()?;
    if priority > MAX_PRIORITY {
        return Err(CodecError::InvalidPriority { value: priority });
    }
    let properties = reader.read_properties("properties")?;
    let payload = decoder(reader)?;

    Ok(Message {
        id,
        correlation_id,
        priority,
        properties,
        payload,
    })
}

fn read_frame_start<R: Read>(
    reader: &mut FrameReader<R>,
    header: &mut [u8; FRAME_HEADER_SIZE_BYTES],
) -> Result<(), CodecError> {
    loop {
        match reader.read(&mut header[..1]) {
            Ok(0) => return Err(CodecError::ConnectionClosed),
            Ok(_) => break,
            Err(source) if source.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => return Err(CodecError::Transport(source)),
        }
    }

    reader.read_exact(&mut header[1..]).map_err(|source| {
        if source.kind() == io::ErrorKind::UnexpectedEof {
            CodecError::Truncated
        } else {
            CodecError::Transport(source)
        }
    })
}

fn skip_to_next_frame<R: Read>(reader: &mut FrameReader<R>) -> Result<(), CodecError> {
    let mut window = [0_u8; 3];
    let mut seen = 0_usize;
    let mut byte = [0_u8; 1];

    loop {
        match reader.read(&mut byte) {
            Ok(0) => return Ok(()),
            Ok(_) => {}
            Err(source) if source.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => return Err(CodecError::Transport(source)),
        }

        window = [window[1], window[2], byte[0]];
        seen += 1;
        if seen >= window.len() && &window == EYE_CATCHER {
            reader.unread(EYE_CATCHER);
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use crate::message::Message;
    use crate::wire::fields::FrameReader;

    use super::{CodecError, DecoderRegistry, WireCodec, EYE_CATCHER};

    fn frame_with_class(class_id: u32, body: &[u8]) -> Vec<u8> {
        let mut frame = EYE_CATCHER.to_vec();
        frame.extend_from_slice(&class_id.to_be_bytes());
        frame.extend_from_slice(body);
        frame
    }

    #[test]
    fn rejects_wrong_eye_catcher() {
        let codec = WireCodec::standard();
        let error = codec
            .decode_slice(b"XYZ\x00\x00\x00\x01")
            .expect_err("bad header should fail");

        assert!(matches!(
            error,
            CodecError::HeaderVerificationFailed { found } if &found == b"XYZ"
        ));
        assert!(error.is_protocol());
        assert!(error.to_string().contains("header verification failed"));
    }

    #[test]
    fn unknown_class_is_skipped_up_to_next_frame() {
        let codec = WireCodec::standard();
        let follow_up = Message::text("after");

        let mut stream = frame_with_class(9_999, b"garbage bytes");
        stream.extend_from_slice(&codec.encode(&follow_up).expect("text should encode"));

        let mut reader = FrameReader::new(Cursor::new(stream));
        let skipped = codec.read(&mut reader).expect("unknown class should not fail");
        assert!(skipped.is_none());

        let next = codec
            .read(&mut reader)
            .expect("next frame should decode")
            .expect("next frame should be registered");
        assert_eq!(next, follow_up);

        let closed = codec.read(&mut reader).expect_err("stream end should be reported");
        assert!(matches!(closed, CodecError::ConnectionClosed));
        assert!(!closed.is_protocol());
    }

    #[test]
    fn empty_registry_drops_everything() {
        let codec = WireCodec::new(DecoderRegistry::new());
        let frame = WireCodec::standard()
            .encode(&Message::text("x"))
            .expect("text should encode");

        assert!(codec
            .decode_slice(&frame)
            .expect("dropping should not fail")
            .is_none());
    }

    #[test]
    fn truncated_header_is_a_protocol_error() {
        let codec = WireCodec::standard();
        let error = codec.decode_slice(b"KA").expect_err("short header should fail");
        assert!(matches!(error, CodecError::Truncated));
    }

    #[test]
    fn priority_above_nine_is_rejected() {
        let codec = WireCodec::standard();
        let mut frame = codec
            .encode(&Message::text("x"))
            .expect("text should encode")
            .to_vec();
        frame[7 + 32] = 12;

        let error = codec.decode_slice(&frame).expect_err("priority 12 should fail");
        assert!(matches!(error, CodecError::InvalidPriority { value: 12 }));
    }

    #[test]
    fn register_replaces_and_reports_previous_decoder() {
        let mut registry = crate::wire::protocol::standard_registry();
        let before = registry.len();
        let text = registry.lookup(1).expect("text decoder should exist");

        assert!(registry.register(1, text).is_some());
        assert!(registry.register(77, text).is_none());
        assert_eq!(registry.len(), before + 1);
        assert!(registry.class_ids().contains(&77));
    }
}
