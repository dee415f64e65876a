// src/core/protocol/state_machine.rs

//! The streaming response decoder. One instance lives per transport
//! attachment and is driven by the command handler's read path: it consumes
//! at most one complete reply per call and routes it into the in-flight
//! command's output sink.

use crate::core::ClientError;
use crate::core::command::RedisCommand;
use crate::core::protocol::resp_frame::decode_frame;
use crate::core::protocol::RespFrame;
use bytes::{Buf, BytesMut};

/// Decodes complete RESP replies out of an accumulating inbound buffer.
///
/// `decode` returns `Ok(true)` exactly once a full reply for `command` has
/// been decoded, in which case the buffer's read cursor has been advanced
/// past that reply. `Ok(false)` means more bytes are required. The state
/// machine remembers how many bytes the last failed attempt needed, so a
/// stream delivered one byte at a time does not re-parse the prefix on
/// every call; `reset` discards that resumption state.
#[derive(Debug, Default)]
pub struct RespStateMachine {
    /// Minimum buffer length before the next parse attempt can succeed.
    needed: usize,
}

impl RespStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to decode one reply for `command` from `buffer`.
    ///
    /// A server `Error` frame is delivered to the command's output error
    /// slot; every other frame is delivered as the output value. Malformed
    /// input is a hard failure and surfaces as `ClientError::Protocol`.
    pub fn decode(
        &mut self,
        buffer: &mut BytesMut,
        command: &RedisCommand,
    ) -> Result<bool, ClientError> {
        if buffer.len() < self.needed {
            return Ok(false);
        }

        match decode_frame(&buffer[..]) {
            Ok((frame, consumed)) => {
                self.needed = 0;
                buffer.advance(consumed);
                match frame {
                    RespFrame::Error(message) => command.set_output_error(&message),
                    frame => command.update_output(frame),
                }
                Ok(true)
            }
            Err(ClientError::IncompleteData) => {
                // The frame cannot complete until at least one more byte arrives.
                self.needed = buffer.len() + 1;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Discards resumption state. Called between transport attachments so
    /// no partial-parse state carries across a reconnect.
    pub fn reset(&mut self) {
        self.needed = 0;
    }
}
