// src/core/command.rs

//! The unit of work exchanged between producers and the connection core.
//!
//! A [`RedisCommand`] is shared between the producer that submitted it and
//! the connection handler that owns its delivery. It is completable exactly
//! once: by normal completion off the read path, by exceptional completion
//! with a cause, or by cancellation. Later completions are no-ops.

use crate::core::ClientError;
use crate::core::protocol::RespFrame;
use bytes::Bytes;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use tokio::sync::oneshot;

/// Monotonic source for command identities. Identity, not structure, is
/// what the queue membership checks compare: two `GET k` commands are
/// distinct units of work.
static NEXT_COMMAND_ID: AtomicU64 = AtomicU64::new(1);

const STATUS_LIVE: u8 = 0;
const STATUS_COMPLETED: u8 = 1;
const STATUS_FAILED: u8 = 2;
const STATUS_CANCELLED: u8 = 3;

/// The per-command accumulator that consumes decoded reply tokens.
///
/// The decoder delivers the reply value through `set`, or an error string
/// through `set_error` (server error replies and bulk-cancellation reasons
/// both land here). `take_result` is consumed once, at completion time.
pub trait CommandOutput: Send {
    fn set(&mut self, frame: RespFrame);
    fn set_error(&mut self, message: &str);
    fn take_result(&mut self) -> Result<RespFrame, String>;
}

/// The standard output sink: stores the decoded frame, or the first error
/// reported, whichever the command completes with.
#[derive(Debug, Default)]
pub struct ValueOutput {
    value: Option<RespFrame>,
    error: Option<String>,
}

impl CommandOutput for ValueOutput {
    fn set(&mut self, frame: RespFrame) {
        self.value = Some(frame);
    }

    fn set_error(&mut self, message: &str) {
        self.error = Some(message.to_string());
    }

    fn take_result(&mut self) -> Result<RespFrame, String> {
        if let Some(message) = self.error.take() {
            return Err(message);
        }
        Ok(self.value.take().unwrap_or(RespFrame::Null))
    }
}

/// The caller's side of a command: resolves when the command reaches a
/// terminal state. A dropped receiver does not affect delivery.
pub type ResponseReceiver = oneshot::Receiver<Result<RespFrame, ClientError>>;

/// A single command invocation: name, arguments, an optional output sink,
/// and a single-shot completion slot.
pub struct RedisCommand {
    id: u64,
    name: String,
    args: Vec<Bytes>,
    output: Option<Mutex<Box<dyn CommandOutput>>>,
    status: AtomicU8,
    waiter: Mutex<Option<oneshot::Sender<Result<RespFrame, ClientError>>>>,
}

impl RedisCommand {
    /// Creates a command with the standard [`ValueOutput`] sink.
    pub fn new(name: &str, args: Vec<Bytes>) -> (Arc<Self>, ResponseReceiver) {
        Self::with_output(name, args, Box::new(ValueOutput::default()))
    }

    /// Creates a command with a caller-supplied output sink.
    pub fn with_output(
        name: &str,
        args: Vec<Bytes>,
        output: Box<dyn CommandOutput>,
    ) -> (Arc<Self>, ResponseReceiver) {
        Self::build(name, args, Some(Mutex::new(output)))
    }

    /// Creates a fire-and-forget command: no output sink means no server
    /// reply is expected, and the command completes as soon as the
    /// transport accepts the write.
    pub fn fire_and_forget(name: &str, args: Vec<Bytes>) -> (Arc<Self>, ResponseReceiver) {
        Self::build(name, args, None)
    }

    fn build(
        name: &str,
        args: Vec<Bytes>,
        output: Option<Mutex<Box<dyn CommandOutput>>>,
    ) -> (Arc<Self>, ResponseReceiver) {
        let (tx, rx) = oneshot::channel();
        let command = Arc::new(Self {
            id: NEXT_COMMAND_ID.fetch_add(1, Ordering::Relaxed),
            name: name.to_string(),
            args,
            output,
            status: AtomicU8::new(STATUS_LIVE),
            waiter: Mutex::new(Some(tx)),
        });
        (command, rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Builds the wire representation: an array of bulk strings.
    pub fn to_frame(&self) -> RespFrame {
        RespFrame::command(&self.name, &self.args)
    }

    pub fn has_output(&self) -> bool {
        self.output.is_some()
    }

    /// Delivers a decoded reply value into the output sink.
    pub fn update_output(&self, frame: RespFrame) {
        if let Some(output) = &self.output {
            output.lock().set(frame);
        }
    }

    /// Marks the output with an error string (server error reply or a bulk
    /// cancellation reason such as "Reset").
    pub fn set_output_error(&self, message: &str) {
        if let Some(output) = &self.output {
            output.lock().set_error(message);
        }
    }

    /// Completes the command normally with whatever the output sink holds.
    /// A stored output error surfaces to the caller as `ClientError::Server`.
    pub fn complete(&self) {
        if !self.transition(STATUS_COMPLETED) {
            return;
        }
        let result = match &self.output {
            Some(output) => output
                .lock()
                .take_result()
                .map_err(ClientError::Server),
            None => Ok(RespFrame::Null),
        };
        self.notify(result);
    }

    /// Completes the command exceptionally with `cause`.
    pub fn complete_exceptionally(&self, cause: ClientError) {
        if !self.transition(STATUS_FAILED) {
            return;
        }
        self.notify(Err(cause));
    }

    /// Cancels the command. The caller observes `ClientError::Cancelled`
    /// carrying the output's error string when one was recorded first.
    pub fn cancel(&self) {
        if !self.transition(STATUS_CANCELLED) {
            return;
        }
        let reason = match &self.output {
            Some(output) => match output.lock().take_result() {
                Err(message) => message,
                Ok(_) => "command cancelled".to_string(),
            },
            None => "command cancelled".to_string(),
        };
        self.notify(Err(ClientError::Cancelled(reason)));
    }

    pub fn is_cancelled(&self) -> bool {
        self.status.load(Ordering::Acquire) == STATUS_CANCELLED
    }

    /// True once the command has reached any terminal state.
    pub fn is_done(&self) -> bool {
        self.status.load(Ordering::Acquire) != STATUS_LIVE
    }

    /// Single-completion gate: only the first terminal transition wins.
    fn transition(&self, target: u8) -> bool {
        self.status
            .compare_exchange(STATUS_LIVE, target, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn notify(&self, result: Result<RespFrame, ClientError>) {
        if let Some(waiter) = self.waiter.lock().take() {
            // The producer may have dropped its receiver; delivery is best-effort.
            let _ = waiter.send(result);
        }
    }
}

// Commands are equal iff they are the same unit of work.
impl PartialEq for RedisCommand {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for RedisCommand {}

impl fmt::Debug for RedisCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCommand")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("args", &self.args.len())
            .finish()
    }
}
