//! Thrift binary protocol (strict) — only what the session RPCs need.

use super::ClientError;

pub const VERSION_1: u32 = 0x8001_0000;

pub const MSG_CALL: u8 = 1;
pub const MSG_REPLY: u8 = 2;
pub const MSG_EXCEPTION: u8 = 3;

pub const T_STOP: u8 = 0;
pub const T_BOOL: u8 = 2;
pub const T_BYTE: u8 = 3;
pub const T_DOUBLE: u8 = 4;
pub const T_I16: u8 = 6;
pub const T_I32: u8 = 8;
pub const T_I64: u8 = 10;
pub const T_STRING: u8 = 11;
pub const T_STRUCT: u8 = 12;
pub const T_MAP: u8 = 13;
pub const T_SET: u8 = 14;
pub const T_LIST: u8 = 15;

const MAX_SKIP_DEPTH: usize = 64;

#[derive(Debug, Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message_begin(&mut self, name: &str, msg_type: u8, seq_id: i32) -> Result<(), ClientError> {
        self.write_u32(VERSION_1 | msg_type as u32);
        self.write_string(name)?;
        self.write_i32(seq_id);
        Ok(())
    }

    pub fn field(&mut self, field_type: u8, id: i16) {
        self.buf.push(field_type);
        self.write_i16(id);
    }

    pub fn stop(&mut self) {
        self.buf.push(T_STOP);
    }

    pub fn write_i16(&mut self, v: i16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// Lengths are i32 on the wire.
    fn write_len(&mut self, len: usize) -> Result<(), ClientError> {
        let len = i32::try_from(len)
            .map_err(|_| ClientError::Encode(format!("length {len} does not fit in i32")))?;
        self.write_i32(len);
        Ok(())
    }

    pub fn write_binary(&mut self, v: &[u8]) -> Result<(), ClientError> {
        self.write_len(v.len())?;
        self.buf.extend_from_slice(v);
        Ok(())
    }

    pub fn write_string(&mut self, v: &str) -> Result<(), ClientError> {
        self.write_binary(v.as_bytes())
    }

    pub fn map_begin(&mut self, key_type: u8, value_type: u8, len: usize) -> Result<(), ClientError> {
        self.buf.push(key_type);
        self.buf.push(value_type);
        self.write_len(len)
    }

    pub fn list_begin(&mut self, elem_type: u8, len: usize) -> Result<(), ClientError> {
        self.buf.push(elem_type);
        self.write_len(len)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Message header of a decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub name: String,
    pub msg_type: u8,
    pub seq_id: i32,
}

pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ClientError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                ClientError::Protocol(format!(
                    "unexpected end of frame: need {n} bytes at offset {}",
                    self.pos
                ))
            })?;
        let buf: &'a [u8] = self.buf;
        let slice = &buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], ClientError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn message_begin(&mut self) -> Result<MessageHeader, ClientError> {
        let word = u32::from_be_bytes(self.take_array()?);
        if word & 0xffff_0000 != VERSION_1 {
            return Err(ClientError::Protocol(format!(
                "bad message header {word:#010x}"
            )));
        }
        let msg_type = (word & 0xff) as u8;
        let name = self.read_string()?;
        let seq_id = self.read_i32()?;
        Ok(MessageHeader {
            name,
            msg_type,
            seq_id,
        })
    }

    /// Next field header, `None` at STOP.
    pub fn field(&mut self) -> Result<Option<(u8, i16)>, ClientError> {
        let field_type = self.read_byte()?;
        if field_type == T_STOP {
            return Ok(None);
        }
        let id = self.read_i16()?;
        Ok(Some((field_type, id)))
    }

    pub fn read_byte(&mut self) -> Result<u8, ClientError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_i16(&mut self) -> Result<i16, ClientError> {
        Ok(i16::from_be_bytes(self.take_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, ClientError> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, ClientError> {
        Ok(i64::from_be_bytes(self.take_array()?))
    }

    fn read_len(&mut self) -> Result<usize, ClientError> {
        let len = self.read_i32()?;
        usize::try_from(len).map_err(|_| ClientError::Protocol(format!("negative length {len}")))
    }

    pub fn read_binary(&mut self) -> Result<&'a [u8], ClientError> {
        let len = self.read_len()?;
        self.take(len)
    }

    pub fn read_string(&mut self) -> Result<String, ClientError> {
        let bytes = self.read_binary()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| ClientError::Protocol(format!("invalid utf-8 string: {e}")))
    }

    /// Skip a value of the given type, including nested containers.
    pub fn skip(&mut self, field_type: u8) -> Result<(), ClientError> {
        self.skip_depth(field_type, 0)
    }

    fn skip_depth(&mut self, field_type: u8, depth: usize) -> Result<(), ClientError> {
        if depth > MAX_SKIP_DEPTH {
            return Err(ClientError::Protocol("nesting too deep".into()));
        }
        match field_type {
            T_BOOL | T_BYTE => {
                self.take(1)?;
            }
            T_I16 => {
                self.take(2)?;
            }
            T_I32 => {
                self.take(4)?;
            }
            T_DOUBLE | T_I64 => {
                self.take(8)?;
            }
            T_STRING => {
                self.read_binary()?;
            }
            T_STRUCT => {
                while let Some((ty, _)) = self.field()? {
                    self.skip_depth(ty, depth + 1)?;
                }
            }
            T_MAP => {
                let key_type = self.read_byte()?;
                let value_type = self.read_byte()?;
                let len = self.read_len()?;
                for _ in 0..len {
                    self.skip_depth(key_type, depth + 1)?;
                    self.skip_depth(value_type, depth + 1)?;
                }
            }
            T_SET | T_LIST => {
                let elem_type = self.read_byte()?;
                let len = self.read_len()?;
                for _ in 0..len {
                    self.skip_depth(elem_type, depth + 1)?;
                }
            }
            other => {
                return Err(ClientError::Protocol(format!("unknown field type {other}")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_header_layout() {
        let mut enc = Encoder::new();
        enc.message_begin("ping", MSG_CALL, 7).unwrap();
        assert_eq!(
            enc.into_bytes(),
            vec![0x80, 0x01, 0x00, 0x01, 0, 0, 0, 4, b'p', b'i', b'n', b'g', 0, 0, 0, 7]
        );
    }

    #[test]
    fn skips_unknown_nested_fields() {
        let mut enc = Encoder::new();
        // field 9: map<string, list<i64>>
        enc.field(T_MAP, 9);
        enc.map_begin(T_STRING, T_LIST, 1).unwrap();
        enc.write_string("k").unwrap();
        enc.list_begin(T_I64, 2).unwrap();
        enc.write_i64(1);
        enc.write_i64(2);
        // field 1: i32
        enc.field(T_I32, 1);
        enc.write_i32(42);
        enc.stop();
        let bytes = enc.into_bytes();

        let mut dec = Decoder::new(&bytes);
        let mut found = None;
        while let Some((ty, id)) = dec.field().unwrap() {
            match (id, ty) {
                (1, T_I32) => found = Some(dec.read_i32().unwrap()),
                _ => dec.skip(ty).unwrap(),
            }
        }
        assert_eq!(found, Some(42));
    }

    #[test]
    fn oversized_length_is_an_encode_error() {
        let mut enc = Encoder::new();
        match enc.list_begin(T_STRING, i32::MAX as usize + 1) {
            Err(ClientError::Encode(msg)) => assert!(msg.contains("2147483648"), "{msg}"),
            other => panic!("expected encode error, got {other:?}"),
        }
        assert!(enc.write_len(usize::MAX).is_err());
        assert!(enc.map_begin(T_STRING, T_STRING, i32::MAX as usize).is_ok());
    }

    #[test]
    fn truncated_input_is_a_protocol_error() {
        let mut dec = Decoder::new(&[0, 0, 0, 10, b'a']);
        match dec.read_string() {
            Err(ClientError::Protocol(_)) => {}
            other => panic!("expected protocol error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unversioned_header() {
        let mut dec = Decoder::new(&[0, 0, 0, 4, b'p', b'i', b'n', b'g', 1, 0, 0, 0, 1]);
        assert!(dec.message_begin().is_err());
    }
}
