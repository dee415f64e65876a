// src/connection/transport.rs

//! The downward seam between the command handler and a duplex byte channel.
//!
//! A transport accepts command writes and flushes, carries user events, runs
//! deferred tasks on its I/O context, and can be shut down. The handler
//! never touches sockets directly; the TCP implementation lives in
//! [`super::tcp`], and tests drive the handler with scripted stand-ins.

use crate::core::ClientError;
use crate::core::command::RedisCommand;
use crate::connection::events::ConnectionEvent;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;

/// A task to run on the transport's I/O context after the current event
/// dispatch unwinds.
pub type DeferredTask = Box<dyn FnOnce() + Send>;

/// The acknowledgement channel for a single transport write.
///
/// `Void` opts out of per-write completion signals: write failures then
/// surface only through the transport's exception path. `Notify` carries a
/// single-shot continuation, invoked once with the write outcome.
pub enum WritePromise {
    Void,
    Notify(Box<dyn FnOnce(Result<(), ClientError>) + Send>),
}

impl WritePromise {
    pub fn notify(f: impl FnOnce(Result<(), ClientError>) + Send + 'static) -> Self {
        WritePromise::Notify(Box::new(f))
    }

    /// Resolves the promise. A `Void` promise discards the outcome.
    pub fn complete(self, result: Result<(), ClientError>) {
        if let WritePromise::Notify(callback) = self {
            callback(result);
        }
    }
}

impl std::fmt::Debug for WritePromise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WritePromise::Void => f.write_str("WritePromise::Void"),
            WritePromise::Notify(_) => f.write_str("WritePromise::Notify"),
        }
    }
}

/// A duplex byte channel as seen by the command handler.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The peer address, used for log prefixes.
    fn remote_addr(&self) -> Option<SocketAddr>;

    /// True while the channel can accept writes.
    fn is_active(&self) -> bool;

    /// Enqueues a command for encoding and transmission. Must preserve the
    /// order in which writes are issued.
    fn write(&self, command: Arc<RedisCommand>, promise: WritePromise);

    /// Flushes previously enqueued writes to the peer.
    fn flush(&self);

    /// Publishes a user event to whoever supervises this connection. A
    /// `Close` event additionally instructs the transport to shut down.
    fn fire_event(&self, event: ConnectionEvent);

    /// Schedules `task` on the I/O context, to run after the event
    /// currently being dispatched has been fully handled.
    fn submit(&self, task: DeferredTask);

    /// Requests shutdown and resolves once the channel has closed.
    async fn close(&self);
}
