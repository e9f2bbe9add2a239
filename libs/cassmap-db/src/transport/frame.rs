//! Native protocol v4 framing and body primitives.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use super::WireError;

pub const VERSION_REQUEST: u8 = 0x04;
pub const VERSION_RESPONSE: u8 = 0x84;
pub const HEADER_LEN: usize = 9;
/// Hard cap from the protocol: 256 MiB.
pub const MAX_BODY_LEN: usize = 256 * 1024 * 1024;

pub const FLAG_COMPRESSION: u8 = 0x01;
pub const FLAG_TRACING: u8 = 0x02;
pub const FLAG_CUSTOM_PAYLOAD: u8 = 0x04;
pub const FLAG_WARNING: u8 = 0x08;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Error = 0x00,
    Startup = 0x01,
    Ready = 0x02,
    Authenticate = 0x03,
    Options = 0x05,
    Supported = 0x06,
    Query = 0x07,
    Result = 0x08,
    Prepare = 0x09,
    Execute = 0x0A,
    AuthResponse = 0x0F,
    AuthSuccess = 0x10,
}

impl Opcode {
    pub fn from_byte(b: u8) -> Result<Self, WireError> {
        let op = match b {
            0x00 => Self::Error,
            0x01 => Self::Startup,
            0x02 => Self::Ready,
            0x03 => Self::Authenticate,
            0x05 => Self::Options,
            0x06 => Self::Supported,
            0x07 => Self::Query,
            0x08 => Self::Result,
            0x09 => Self::Prepare,
            0x0A => Self::Execute,
            0x0F => Self::AuthResponse,
            0x10 => Self::AuthSuccess,
            other => return Err(WireError::protocol(format!("unexpected opcode 0x{other:02x}"))),
        };
        Ok(op)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub flags: u8,
    pub stream: i16,
    pub opcode: Opcode,
    pub body: Vec<u8>,
}

/// Write one request frame.
pub fn write_frame<W: Write>(
    out: &mut W,
    stream: i16,
    opcode: Opcode,
    body: &[u8],
) -> Result<(), WireError> {
    let len = i32::try_from(body.len())
        .map_err(|_| WireError::protocol("request body exceeds frame limit"))?;
    let mut header = [0u8; HEADER_LEN];
    header[0] = VERSION_REQUEST;
    header[1] = 0;
    header[2..4].copy_from_slice(&stream.to_be_bytes());
    header[4] = opcode as u8;
    header[5..9].copy_from_slice(&len.to_be_bytes());
    out.write_all(&header)?;
    out.write_all(body)?;
    out.flush()?;
    Ok(())
}

/// Read one response frame, rejecting anything that is not a v4 response.
pub fn read_frame<R: Read>(input: &mut R) -> Result<Frame, WireError> {
    let mut header = [0u8; HEADER_LEN];
    input.read_exact(&mut header)?;
    if header[0] != VERSION_RESPONSE {
        return Err(WireError::protocol(format!(
            "unsupported protocol version byte 0x{:02x}",
            header[0]
        )));
    }
    let flags = header[1];
    let stream = i16::from_be_bytes([header[2], header[3]]);
    let opcode = Opcode::from_byte(header[4])?;
    let len = i32::from_be_bytes([header[5], header[6], header[7], header[8]]);
    let len = usize::try_from(len)
        .ok()
        .filter(|l| *l <= MAX_BODY_LEN)
        .ok_or_else(|| WireError::protocol(format!("invalid frame length {len}")))?;
    let mut body = vec![0u8; len];
    input.read_exact(&mut body)?;
    Ok(Frame {
        flags,
        stream,
        opcode,
        body,
    })
}

/// Builder for request bodies.
#[derive(Debug, Default)]
pub struct BodyWriter {
    buf: Vec<u8>,
}

impl BodyWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn byte(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn short(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn int(&mut self, v: i32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    fn short_len(len: usize) -> Result<u16, WireError> {
        u16::try_from(len).map_err(|_| WireError::protocol("value exceeds [short] length"))
    }

    fn int_len(len: usize) -> Result<i32, WireError> {
        i32::try_from(len).map_err(|_| WireError::protocol("value exceeds [int] length"))
    }

    /// `[string]`: short length + UTF-8.
    pub fn string(&mut self, s: &str) -> Result<&mut Self, WireError> {
        self.short(Self::short_len(s.len())?);
        self.buf.extend_from_slice(s.as_bytes());
        Ok(self)
    }

    /// `[long string]`: int length + UTF-8.
    pub fn long_string(&mut self, s: &str) -> Result<&mut Self, WireError> {
        self.int(Self::int_len(s.len())?);
        self.buf.extend_from_slice(s.as_bytes());
        Ok(self)
    }

    /// `[bytes]`: int length (negative for null) + bytes.
    pub fn bytes(&mut self, b: Option<&[u8]>) -> Result<&mut Self, WireError> {
        match b {
            None => {
                self.int(-1);
            }
            Some(b) => {
                self.int(Self::int_len(b.len())?);
                self.buf.extend_from_slice(b);
            }
        }
        Ok(self)
    }

    /// `[short bytes]`.
    pub fn short_bytes(&mut self, b: &[u8]) -> Result<&mut Self, WireError> {
        self.short(Self::short_len(b.len())?);
        self.buf.extend_from_slice(b);
        Ok(self)
    }

    /// `[string map]`.
    pub fn string_map(&mut self, map: &BTreeMap<&str, &str>) -> Result<&mut Self, WireError> {
        self.short(Self::short_len(map.len())?);
        for (k, v) in map {
            self.string(k)?;
            self.string(v)?;
        }
        Ok(self)
    }
}

/// Cursor over a response body.
#[derive(Debug)]
pub struct BodyReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BodyReader<'a> {
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| WireError::protocol("truncated response body"))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    #[cfg(test)]
    pub fn byte(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    pub fn short(&mut self) -> Result<u16, WireError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn int(&mut self) -> Result<i32, WireError> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn string(&mut self) -> Result<String, WireError> {
        let len = usize::from(self.short()?);
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).map_err(|e| WireError::protocol(e.to_string()))
    }

    #[cfg(test)]
    pub fn long_string(&mut self) -> Result<String, WireError> {
        let len = self.int()?;
        let len = usize::try_from(len).map_err(|_| WireError::protocol("negative string length"))?;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).map_err(|e| WireError::protocol(e.to_string()))
    }

    pub fn bytes(&mut self) -> Result<Option<Vec<u8>>, WireError> {
        let len = self.int()?;
        match usize::try_from(len) {
            Ok(len) => Ok(Some(self.take(len)?.to_vec())),
            Err(_) => Ok(None),
        }
    }

    pub fn short_bytes(&mut self) -> Result<Vec<u8>, WireError> {
        let len = usize::from(self.short()?);
        Ok(self.take(len)?.to_vec())
    }

    pub fn string_list(&mut self) -> Result<Vec<String>, WireError> {
        let n = self.short()?;
        (0..n).map(|_| self.string()).collect()
    }

    /// Skip a `[bytes map]` (custom payload).
    pub fn skip_bytes_map(&mut self) -> Result<(), WireError> {
        let n = self.short()?;
        for _ in 0..n {
            self.string()?;
            self.bytes()?;
        }
        Ok(())
    }

    pub fn skip(&mut self, n: usize) -> Result<(), WireError> {
        self.take(n).map(|_| ())
    }

    /// Skip a column type `[option]`, recursing into collection and UDT types.
    pub fn skip_type(&mut self) -> Result<(), WireError> {
        match self.short()? {
            0x0000 => {
                self.string()?;
            }
            0x0020 | 0x0022 => self.skip_type()?,
            0x0021 => {
                self.skip_type()?;
                self.skip_type()?;
            }
            0x0030 => {
                self.string()?;
                self.string()?;
                let n = self.short()?;
                for _ in 0..n {
                    self.string()?;
                    self.skip_type()?;
                }
            }
            0x0031 => {
                let n = self.short()?;
                for _ in 0..n {
                    self.skip_type()?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    #[must_use]
    pub fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}
