// src/core/protocol/resp_frame.rs

//! The RESP (REdis Serialization Protocol) data model, a cursor-based
//! frame reader for the response decoder, and the `Encoder` that puts
//! outbound commands on the wire.

use crate::core::ClientError;
use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::Encoder;

// Guards against absurd declared sizes in inbound frames.
const ARRAY_ELEMENT_LIMIT: usize = 1 << 20;
const BULK_PAYLOAD_LIMIT: usize = 512 << 20;

/// An enum representing a single frame in the RESP protocol.
/// This is the low-level representation of data exchanged between the client and server.
#[derive(Debug, Clone, PartialEq)]
pub enum RespFrame {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Bytes),
    Null,
    NullArray,
    Array(Vec<RespFrame>),
}

impl RespFrame {
    /// Builds the request frame for a command invocation: a RESP array of
    /// bulk strings, the command name first.
    pub fn command(name: &str, args: &[Bytes]) -> RespFrame {
        let mut parts = Vec::with_capacity(args.len() + 1);
        parts.push(RespFrame::BulkString(Bytes::copy_from_slice(
            name.as_bytes(),
        )));
        parts.extend(args.iter().cloned().map(RespFrame::BulkString));
        RespFrame::Array(parts)
    }

    /// Encodes this frame into a standalone byte vector.
    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        write_frame(self, &mut buf);
        buf.to_vec()
    }
}

/// A `tokio_util::codec` implementation for encoding `RespFrame`s. The read
/// side of a connection does not use a codec: inbound bytes are accumulated
/// by the command handler and decoded by [`super::RespStateMachine`], which
/// needs to correlate frames with in-flight commands.
#[derive(Debug)]
pub struct RespFrameCodec;

impl Encoder<RespFrame> for RespFrameCodec {
    type Error = ClientError;

    fn encode(&mut self, item: RespFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        write_frame(&item, dst);
        Ok(())
    }
}

fn write_frame(frame: &RespFrame, dst: &mut BytesMut) {
    match frame {
        RespFrame::SimpleString(s) => write_line(dst, b'+', s.as_bytes()),
        RespFrame::Error(s) => write_line(dst, b'-', s.as_bytes()),
        RespFrame::Integer(i) => write_line(dst, b':', i.to_string().as_bytes()),
        RespFrame::BulkString(payload) => {
            write_line(dst, b'$', payload.len().to_string().as_bytes());
            dst.put_slice(payload);
            dst.put_slice(b"\r\n");
        }
        RespFrame::Null => dst.put_slice(b"$-1\r\n"),
        RespFrame::NullArray => dst.put_slice(b"*-1\r\n"),
        RespFrame::Array(items) => {
            write_line(dst, b'*', items.len().to_string().as_bytes());
            for item in items {
                write_frame(item, dst);
            }
        }
    }
}

fn write_line(dst: &mut BytesMut, prefix: u8, body: &[u8]) {
    dst.put_u8(prefix);
    dst.put_slice(body);
    dst.put_slice(b"\r\n");
}

/// Reads one complete frame from the front of `src`, returning it together
/// with the number of bytes it occupied. `IncompleteData` means `src` ends
/// before the frame does; nothing is consumed in that case.
pub fn decode_frame(src: &[u8]) -> Result<(RespFrame, usize), ClientError> {
    let mut scanner = FrameScanner { src, pos: 0 };
    let frame = scanner.read_frame()?;
    Ok((frame, scanner.pos))
}

/// A read cursor over a byte slice. Every `read_*` method either consumes
/// what it returns or leaves the position untouched and reports why.
struct FrameScanner<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> FrameScanner<'a> {
    fn read_frame(&mut self) -> Result<RespFrame, ClientError> {
        match self.read_byte()? {
            b'+' => Ok(RespFrame::SimpleString(self.read_text_line()?)),
            b'-' => Ok(RespFrame::Error(self.read_text_line()?)),
            b':' => {
                let line = self.read_line()?;
                Ok(RespFrame::Integer(parse_decimal(line)?))
            }
            b'$' => self.read_bulk_string(),
            b'*' => self.read_array(),
            other => Err(ClientError::Protocol(format!(
                "invalid frame type prefix: 0x{other:02x}"
            ))),
        }
    }

    fn read_bulk_string(&mut self) -> Result<RespFrame, ClientError> {
        match parse_decimal(self.read_line()?)? {
            -1 => Ok(RespFrame::Null),
            len if len < 0 => Err(ClientError::Protocol(format!(
                "negative bulk string length: {len}"
            ))),
            len if len as usize > BULK_PAYLOAD_LIMIT => Err(ClientError::Protocol(format!(
                "bulk string length {len} exceeds limit"
            ))),
            len => {
                let payload = self.read_payload(len as usize)?;
                Ok(RespFrame::BulkString(Bytes::copy_from_slice(payload)))
            }
        }
    }

    fn read_array(&mut self) -> Result<RespFrame, ClientError> {
        match parse_decimal(self.read_line()?)? {
            -1 => Ok(RespFrame::NullArray),
            len if len < 0 => Err(ClientError::Protocol(format!(
                "negative array length: {len}"
            ))),
            len if len as usize > ARRAY_ELEMENT_LIMIT => Err(ClientError::Protocol(format!(
                "array length {len} exceeds limit"
            ))),
            len => {
                let mut items = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    items.push(self.read_frame()?);
                }
                Ok(RespFrame::Array(items))
            }
        }
    }

    fn read_byte(&mut self) -> Result<u8, ClientError> {
        let Some(&byte) = self.src.get(self.pos) else {
            return Err(ClientError::IncompleteData);
        };
        self.pos += 1;
        Ok(byte)
    }

    /// Consumes up to and including the next CRLF, returning the bytes
    /// before it.
    fn read_line(&mut self) -> Result<&'a [u8], ClientError> {
        let rest = &self.src[self.pos..];
        let Some(newline) = rest.iter().position(|&b| b == b'\n') else {
            return Err(ClientError::IncompleteData);
        };
        if newline == 0 || rest[newline - 1] != b'\r' {
            return Err(ClientError::Protocol(
                "line not terminated by CRLF".to_string(),
            ));
        }
        self.pos += newline + 1;
        Ok(&rest[..newline - 1])
    }

    fn read_text_line(&mut self) -> Result<String, ClientError> {
        let line = self.read_line()?;
        Ok(String::from_utf8_lossy(line).into_owned())
    }

    /// Consumes a bulk payload of exactly `len` bytes plus its trailing
    /// CRLF.
    fn read_payload(&mut self, len: usize) -> Result<&'a [u8], ClientError> {
        let end = self.pos + len;
        if self.src.len() < end + 2 {
            return Err(ClientError::IncompleteData);
        }
        if self.src[end] != b'\r' || self.src[end + 1] != b'\n' {
            return Err(ClientError::Protocol(
                "bulk string payload not terminated by CRLF".to_string(),
            ));
        }
        let payload = &self.src[self.pos..end];
        self.pos = end + 2;
        Ok(payload)
    }
}

/// Parses a length or integer field. RESP writes these as ASCII decimals.
fn parse_decimal(line: &[u8]) -> Result<i64, ClientError> {
    let text = std::str::from_utf8(line)
        .map_err(|_| ClientError::Protocol("non-ASCII decimal field".to_string()))?;
    text.parse::<i64>()
        .map_err(|_| ClientError::Protocol(format!("invalid decimal field: {text}")))
}
