use std::io::{self, Read};

use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

use crate::message::{Message, Properties, PropertyValue};
use crate::wire::codec::{self, CodecError, DecoderRegistry};
use crate::wire::protocol;

/// Largest string or byte array accepted from a peer. Encoding is only bound
/// by the u32 length prefix.
pub const MAX_FIELD_LEN_BYTES: usize = 64 * 1024 * 1024;

const READ_CHUNK_BYTES: usize = 8 * 1024;

const TAG_STR: u8 = 0;
const TAG_INT: u8 = 1;
const TAG_LONG: u8 = 2;
const TAG_BOOL: u8 = 3;
const TAG_BYTES: u8 = 4;

/// Appends big-endian fields to a growable frame buffer.
#[derive(Debug, Default)]
pub struct FieldWriter {
    buffer: BytesMut,
}

impl FieldWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn freeze(self) -> Bytes {
        self.buffer.freeze()
    }

    pub fn put_raw(&mut self, bytes: &[u8]) {
        self.buffer.put_slice(bytes);
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buffer.put_u8(value);
    }

    pub fn put_bool(&mut self, value: bool) {
        self.buffer.put_u8(u8::from(value));
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buffer.put_u32(value);
    }

    pub fn put_i32(&mut self, value: i32) {
        self.buffer.put_i32(value);
    }

    pub fn put_i64(&mut self, value: i64) {
        self.buffer.put_i64(value);
    }

    pub fn put_uuid(&mut self, value: Uuid) {
        self.buffer.put_slice(value.as_bytes());
    }

    /// `None` travels as the nil UUID.
    pub fn put_optional_uuid(&mut self, value: Option<Uuid>) {
        self.put_uuid(value.unwrap_or_else(Uuid::nil));
    }

    pub fn put_bytes(&mut self, field: &'static str, value: &[u8]) -> Result<(), CodecError> {
        let len = u32::try_from(value.len()).map_err(|_| CodecError::FieldTooLarge {
            field,
            size: value.len(),
            limit: u32::MAX as usize,
        })?;
        self.buffer.put_u32(len);
        self.buffer.put_slice(value);
        Ok(())
    }

    pub fn put_string(&mut self, field: &'static str, value: &str) -> Result<(), CodecError> {
        self.put_bytes(field, value.as_bytes())
    }

    pub fn put_optional_string(
        &mut self,
        field: &'static str,
        value: Option<&str>,
    ) -> Result<(), CodecError> {
        self.put_bool(value.is_some());
        match value {
            Some(value) => self.put_string(field, value),
            None => Ok(()),
        }
    }

    pub fn put_optional_i32(&mut self, value: Option<i32>) {
        self.put_bool(value.is_some());
        if let Some(value) = value {
            self.put_i32(value);
        }
    }

    pub fn put_property_value(
        &mut self,
        field: &'static str,
        value: &PropertyValue,
    ) -> Result<(), CodecError> {
        match value {
            PropertyValue::Str(value) => {
                self.put_u8(TAG_STR);
                self.put_string(field, value)
            }
            PropertyValue::Int(value) => {
                self.put_u8(TAG_INT);
                self.put_i32(*value);
                Ok(())
            }
            PropertyValue::Long(value) => {
                self.put_u8(TAG_LONG);
                self.put_i64(*value);
                Ok(())
            }
            PropertyValue::Bool(value) => {
                self.put_u8(TAG_BOOL);
                self.put_bool(*value);
                Ok(())
            }
            PropertyValue::Bytes(value) => {
                self.put_u8(TAG_BYTES);
                self.put_bytes(field, value)
            }
        }
    }

    pub fn put_properties(
        &mut self,
        field: &'static str,
        properties: &Properties,
    ) -> Result<(), CodecError> {
        self.put_count(field, properties.len())?;
        for (key, value) in properties.iter() {
            self.put_string(field, key)?;
            self.put_property_value(field, value)?;
        }
        Ok(())
    }

    pub fn put_value_list(
        &mut self,
        field: &'static str,
        values: &[PropertyValue],
    ) -> Result<(), CodecError> {
        self.put_count(field, values.len())?;
        for value in values {
            self.put_property_value(field, value)?;
        }
        Ok(())
    }

    pub fn put_message(&mut self, message: &Message) -> Result<(), CodecError> {
        codec::write_message_fields(self, message)
    }

    fn put_count(&mut self, field: &'static str, count: usize) -> Result<(), CodecError> {
        let count = u32::try_from(count).map_err(|_| CodecError::FieldTooLarge {
            field,
            size: count,
            limit: u32::MAX as usize,
        })?;
        self.put_u32(count);
        Ok(())
    }
}

/// Reads big-endian fields from a frame source. Carries the decoder registry so
/// nested messages (a PUT body) decode through the same table.
pub struct FieldReader<'a> {
    source: &'a mut dyn Read,
    registry: &'a DecoderRegistry,
}

impl<'a> FieldReader<'a> {
    pub fn new(source: &'a mut dyn Read, registry: &'a DecoderRegistry) -> Self {
        Self { source, registry }
    }

    pub fn registry(&self) -> &DecoderRegistry {
        self.registry
    }

    pub fn read_exact(&mut self, buffer: &mut [u8]) -> Result<(), CodecError> {
        self.source.read_exact(buffer).map_err(|source| {
            if source.kind() == io::ErrorKind::UnexpectedEof {
                CodecError::Truncated
            } else {
                CodecError::Transport(source)
            }
        })
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        let mut buffer = [0_u8; 1];
        self.read_exact(&mut buffer)?;
        Ok(buffer[0])
    }

    pub fn read_bool(&mut self, field: &'static str) -> Result<bool, CodecError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            tag => Err(CodecError::InvalidTag { field, tag }),
        }
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        let mut buffer = [0_u8; 4];
        self.read_exact(&mut buffer)?;
        Ok(u32::from_be_bytes(buffer))
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        let mut buffer = [0_u8; 4];
        self.read_exact(&mut buffer)?;
        Ok(i32::from_be_bytes(buffer))
    }

    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        let mut buffer = [0_u8; 8];
        self.read_exact(&mut buffer)?;
        Ok(i64::from_be_bytes(buffer))
    }

    pub fn read_uuid(&mut self) -> Result<Uuid, CodecError> {
        let mut buffer = [0_u8; 16];
        self.read_exact(&mut buffer)?;
        Ok(Uuid::from_bytes(buffer))
    }

    pub fn read_optional_uuid(&mut self) -> Result<Option<Uuid>, CodecError> {
        let value = self.read_uuid()?;
        Ok((!value.is_nil()).then_some(value))
    }

    pub fn read_bytes(&mut self, field: &'static str) -> Result<Vec<u8>, CodecError> {
        let len = self.read_u32()? as usize;
        if len > MAX_FIELD_LEN_BYTES {
            return Err(CodecError::FieldTooLarge {
                field,
                size: len,
                limit: MAX_FIELD_LEN_BYTES,
            });
        }

        let mut buffer = vec![0_u8; len];
        self.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    pub fn read_string(&mut self, field: &'static str) -> Result<String, CodecError> {
        let raw = self.read_bytes(field)?;
        String::from_utf8(raw).map_err(|_| CodecError::InvalidUtf8 { field })
    }

    pub fn read_optional_string(&mut self, field: &'static str) -> Result<Option<String>, CodecError> {
        if self.read_bool(field)? {
            self.read_string(field).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn read_optional_i32(&mut self, field: &'static str) -> Result<Option<i32>, CodecError> {
        if self.read_bool(field)? {
            self.read_i32().map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn read_property_value(&mut self, field: &'static str) -> Result<PropertyValue, CodecError> {
        match self.read_u8()? {
            TAG_STR => self.read_string(field).map(PropertyValue::Str),
            TAG_INT => self.read_i32().map(PropertyValue::Int),
            TAG_LONG => self.read_i64().map(PropertyValue::Long),
            TAG_BOOL => self.read_bool(field).map(PropertyValue::Bool),
            TAG_BYTES => self.read_bytes(field).map(PropertyValue::Bytes),
            tag => Err(CodecError::InvalidTag { field, tag }),
        }
    }

    pub fn read_properties(&mut self, field: &'static str) -> Result<Properties, CodecError> {
        let count = self.read_u32()?;
        let mut properties = Properties::new();
        for _ in 0..count {
            let key = self.read_string(field)?;
            let value = self.read_property_value(field)?;
            properties.set(key, value);
        }
        Ok(properties)
    }

    pub fn read_value_list(&mut self, field: &'static str) -> Result<Vec<PropertyValue>, CodecError> {
        let count = self.read_u32()?;
        let mut values = Vec::new();
        for _ in 0..count {
            values.push(self.read_property_value(field)?);
        }
        Ok(values)
    }

    /// Reads a complete embedded frame. An unregistered class inside another
    /// frame cannot be skipped and fails the outer frame. Only data classes may
    /// be embedded, so decoding never nests more than one level.
    pub fn read_message(&mut self) -> Result<Message, CodecError> {
        let class_id = codec::read_header(self)?;
        if self.registry.lookup(class_id).is_none() {
            return Err(CodecError::UnknownNestedClass { class_id });
        }
        if !protocol::is_data_class(class_id) {
            return Err(CodecError::NestedNonDataClass { class_id });
        }
        codec::read_message_body(self, class_id)
    }
}

/// Buffered reader with push-back, used to leave a resynchronized eye-catcher
/// unconsumed for the next read.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    buffer: Vec<u8>,
    position: usize,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            position: 0,
        }
    }

    pub fn has_buffered(&self) -> bool {
        self.position < self.buffer.len()
    }

    pub fn unread(&mut self, bytes: &[u8]) {
        let mut restored = bytes.to_vec();
        restored.extend_from_slice(&self.buffer[self.position..]);
        self.buffer = restored;
        self.position = 0;
    }

    fn fill(&mut self) -> io::Result<usize> {
        let mut chunk = vec![0_u8; READ_CHUNK_BYTES];
        let read = self.inner.read(&mut chunk)?;
        chunk.truncate(read);
        self.buffer = chunk;
        self.position = 0;
        Ok(read)
    }
}

impl<R: Read> Read for FrameReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        if !self.has_buffered() && self.fill()? == 0 {
            return Ok(0);
        }

        let available = &self.buffer[self.position..];
        let count = available.len().min(out.len());
        out[..count].copy_from_slice(&available[..count]);
        self.position += count;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read};

    use uuid::Uuid;

    use crate::message::{Properties, PropertyValue};
    use crate::wire::codec::{CodecError, DecoderRegistry};

    use super::{FieldReader, FieldWriter, FrameReader, MAX_FIELD_LEN_BYTES};

    #[test]
    fn scalar_fields_are_big_endian() {
        let mut writer = FieldWriter::new();
        writer.put_i32(1);
        writer.put_i64(-2);
        writer.put_bool(true);

        let bytes = writer.freeze();
        assert_eq!(&bytes[..4], &[0, 0, 0, 1]);
        assert_eq!(&bytes[4..12], &(-2_i64).to_be_bytes());
        assert_eq!(bytes[12], 1);
    }

    #[test]
    fn nil_uuid_reads_back_as_none() {
        let mut writer = FieldWriter::new();
        writer.put_optional_uuid(None);
        let id = Uuid::new_v4();
        writer.put_optional_uuid(Some(id));

        let bytes = writer.freeze();
        let registry = DecoderRegistry::new();
        let mut source = Cursor::new(bytes.to_vec());
        let mut reader = FieldReader::new(&mut source, &registry);

        assert_eq!(reader.read_optional_uuid().expect("nil should read"), None);
        assert_eq!(reader.read_optional_uuid().expect("id should read"), Some(id));
    }

    #[test]
    fn property_bag_survives_field_encoding() {
        let mut properties = Properties::new();
        properties.set("a", "x");
        properties.set("b", 7_i32);
        properties.set("c", vec![9_u8]);

        let mut writer = FieldWriter::new();
        writer
            .put_properties("properties", &properties)
            .expect("properties should encode");
        writer
            .put_value_list("stream", &[PropertyValue::Long(5), PropertyValue::Bool(false)])
            .expect("values should encode");

        let bytes = writer.freeze();
        let registry = DecoderRegistry::new();
        let mut source = Cursor::new(bytes.to_vec());
        let mut reader = FieldReader::new(&mut source, &registry);

        assert_eq!(
            reader.read_properties("properties").expect("properties should decode"),
            properties
        );
        assert_eq!(
            reader.read_value_list("stream").expect("values should decode"),
            vec![PropertyValue::Long(5), PropertyValue::Bool(false)]
        );
    }

    #[test]
    fn malformed_fields_are_protocol_errors() {
        let registry = DecoderRegistry::new();

        let mut bad_utf8 = Cursor::new(vec![0, 0, 0, 2, 0xff, 0xfe]);
        let err = FieldReader::new(&mut bad_utf8, &registry)
            .read_string("user")
            .expect_err("invalid utf-8 should fail");
        assert!(matches!(err, CodecError::InvalidUtf8 { field: "user" }));

        let mut bad_bool = Cursor::new(vec![7]);
        let err = FieldReader::new(&mut bad_bool, &registry)
            .read_bool("force")
            .expect_err("bool tag 7 should fail");
        assert!(matches!(err, CodecError::InvalidTag { field: "force", tag: 7 }));

        let mut truncated = Cursor::new(vec![0, 0, 0, 9, b'a']);
        let err = FieldReader::new(&mut truncated, &registry)
            .read_string("queue")
            .expect_err("short string should fail");
        assert!(matches!(err, CodecError::Truncated));

        let mut oversized = Cursor::new(((MAX_FIELD_LEN_BYTES + 1) as u32).to_be_bytes().to_vec());
        let err = FieldReader::new(&mut oversized, &registry)
            .read_bytes("body")
            .expect_err("oversized field should fail");
        assert!(matches!(err, CodecError::FieldTooLarge { .. }));
        assert!(err.is_protocol());
    }

    #[test]
    fn frame_reader_serves_unread_bytes_first() {
        let mut reader = FrameReader::new(Cursor::new(b"DEF".to_vec()));
        let mut first = [0_u8; 1];
        reader.read_exact(&mut first).expect("first byte should read");
        assert_eq!(&first, b"D");

        reader.unread(b"ABC");
        assert!(reader.has_buffered());

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).expect("rest should read");
        assert_eq!(rest, b"ABCEF");
    }
}
