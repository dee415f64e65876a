// src/connection/tcp.rs

//! The tokio TCP implementation of the transport seam.
//!
//! `connect` attaches a [`CommandHandler`] to a freshly connected socket
//! and spawns the single I/O task that owns it: outbound messages (writes,
//! flushes, deferred tasks, close requests) arrive over an mpsc channel and
//! are applied in order, inbound bytes are read off the socket and handed
//! to the handler's read path, and lifecycle events are delivered to the
//! handler as the socket moves through its life.

use crate::connection::events::ConnectionEvent;
use crate::connection::handler::CommandHandler;
use crate::connection::transport::{DeferredTask, Transport, WritePromise};
use crate::core::ClientError;
use crate::core::command::RedisCommand;
use crate::core::protocol::{RespFrame, RespFrameCodec};
use async_trait::async_trait;
use bytes::BytesMut;
use futures::SinkExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::{mpsc, watch};
use tokio_util::codec::FramedWrite;
use tracing::{debug, warn};

const READ_CHUNK_CAPACITY: usize = 8 * 1024;

/// Messages consumed in order by the I/O task.
enum Outbound {
    Write(Arc<RedisCommand>, WritePromise),
    Flush,
    Task(DeferredTask),
    Close,
}

/// A live TCP attachment. Cheap to share; all socket access happens on the
/// I/O task.
pub struct TcpTransport {
    remote: SocketAddr,
    active: AtomicBool,
    outbound: mpsc::UnboundedSender<Outbound>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    closed: watch::Receiver<bool>,
}

/// Connects to `addr`, registers and activates `handler` against the new
/// socket, and spawns the I/O task.
///
/// Registration and activation run before this returns, so a command
/// written immediately afterwards sees an active transport. The returned
/// receiver carries the connection's user events (`Activated`,
/// `PrepareClose`, `Close`).
pub async fn connect(
    addr: SocketAddr,
    handler: Arc<CommandHandler>,
) -> Result<(Arc<TcpTransport>, mpsc::UnboundedReceiver<ConnectionEvent>), ClientError> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    let remote = stream.peer_addr()?;

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (closed_tx, closed_rx) = watch::channel(false);

    let transport = Arc::new(TcpTransport {
        remote,
        active: AtomicBool::new(true),
        outbound: outbound_tx,
        events: event_tx,
        closed: closed_rx,
    });

    handler.on_registered(transport.clone());
    if let Err(cause) = handler.on_active(transport.clone()) {
        // Activation failed before the I/O task existed; unwind the
        // attachment and surface the cause to the caller.
        transport.active.store(false, Ordering::Release);
        handler.on_inactive();
        handler.on_unregistered();
        let _ = closed_tx.send(true);
        return Err(cause);
    }

    tokio::spawn(io_task(
        stream,
        Arc::clone(&handler),
        Arc::clone(&transport),
        outbound_rx,
        closed_tx,
    ));

    Ok((transport, event_rx))
}

async fn io_task(
    stream: TcpStream,
    handler: Arc<CommandHandler>,
    transport: Arc<TcpTransport>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    closed_tx: watch::Sender<bool>,
) {
    let remote = transport.remote;
    let (read_half, write_half) = stream.into_split();
    let mut writer = FramedWrite::new(write_half, RespFrameCodec);
    let mut reader: OwnedReadHalf = read_half;
    let mut inbound = BytesMut::with_capacity(READ_CHUNK_CAPACITY);

    'io: loop {
        tokio::select! {
            message = outbound.recv() => match message {
                Some(Outbound::Write(command, promise)) => {
                    match writer.feed(command.to_frame()).await {
                        Ok(()) => promise.complete(Ok(())),
                        Err(cause) => {
                            // A write with a completion promise reports its
                            // failure there; a void-promise write surfaces
                            // only through the exception path.
                            match promise {
                                WritePromise::Void => {
                                    if let Some(unhandled) = handler.on_exception(cause) {
                                        warn!("[{remote}] write error: {unhandled}");
                                    }
                                }
                                promise => promise.complete(Err(cause)),
                            }
                            break 'io;
                        }
                    }
                }
                Some(Outbound::Flush) => {
                    if let Err(cause) = SinkExt::<RespFrame>::flush(&mut writer).await {
                        if let Some(unhandled) = handler.on_exception(cause) {
                            warn!("[{remote}] flush error: {unhandled}");
                        }
                        break 'io;
                    }
                }
                Some(Outbound::Task(task)) => task(),
                Some(Outbound::Close) | None => {
                    debug!("[{remote}] close requested");
                    break 'io;
                }
            },
            result = reader.read_buf(&mut inbound) => match result {
                Ok(0) => {
                    debug!("[{remote}] connection closed by peer");
                    break 'io;
                }
                Ok(_) => {
                    handler.on_read(&inbound);
                    inbound.clear();
                }
                Err(e) => {
                    if is_normal_disconnect(&e) {
                        debug!("[{remote}] connection lost: {e}");
                    } else {
                        warn!("[{remote}] read error: {e}");
                    }
                    if let Some(unhandled) = handler.on_exception(e.into()) {
                        debug!("[{remote}] read error propagated: {unhandled}");
                    }
                    break 'io;
                }
            },
        }
    }

    transport.active.store(false, Ordering::Release);
    handler.on_inactive();
    handler.on_unregistered();
    let _ = closed_tx.send(true);
}

#[async_trait]
impl Transport for TcpTransport {
    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(self.remote)
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire) && !self.outbound.is_closed()
    }

    fn write(&self, command: Arc<RedisCommand>, promise: WritePromise) {
        if let Err(rejected) = self.outbound.send(Outbound::Write(command, promise))
            && let Outbound::Write(_, promise) = rejected.0
        {
            promise.complete(Err(ClientError::ConnectionClosed));
        }
    }

    fn flush(&self) {
        let _ = self.outbound.send(Outbound::Flush);
    }

    fn fire_event(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
        if event == ConnectionEvent::Close {
            let _ = self.outbound.send(Outbound::Close);
        }
    }

    fn submit(&self, task: DeferredTask) {
        // Dropped if the I/O task is already gone; there is nobody left to
        // observe the deferred notification.
        let _ = self.outbound.send(Outbound::Task(task));
    }

    async fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
        let mut closed = self.closed.clone();
        loop {
            if *closed.borrow_and_update() {
                return;
            }
            if closed.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Helper function to check for non-critical disconnection errors.
fn is_normal_disconnect(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionAborted
    )
}
