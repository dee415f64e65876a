// src/client.rs

//! A thin, typed facade over the connection core for direct use: connect,
//! dispatch raw commands, and a handful of common operations.

use crate::config::ClientOptions;
use crate::connection::events::ConnectionEvent;
use crate::connection::handler::CommandHandler;
use crate::connection::tcp;
use crate::core::command::{RedisCommand, ResponseReceiver};
use crate::core::protocol::RespFrame;
use crate::core::ClientError;
use bytes::Bytes;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// A connected client over a single transport attachment.
///
/// All methods take `&self`; the underlying handler serializes concurrent
/// submissions. Reconnect supervision is intentionally left to the caller:
/// on disconnect the handler keeps buffering (when `auto_reconnect` is
/// set) until a new transport is attached via [`tcp::connect`].
pub struct Client {
    handler: Arc<CommandHandler>,
    events: Mutex<Option<mpsc::UnboundedReceiver<ConnectionEvent>>>,
}

impl Client {
    /// Connects to `addr` and activates a fresh connection core with
    /// `options`.
    pub async fn connect(addr: SocketAddr, options: ClientOptions) -> Result<Self, ClientError> {
        let timeout = Duration::from_millis(options.connect_timeout_ms);
        let handler = Arc::new(CommandHandler::new(Arc::new(options)));

        let (_transport, events) = tokio::time::timeout(timeout, tcp::connect(addr, Arc::clone(&handler)))
            .await
            .map_err(|_| {
                ClientError::Io(Arc::new(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect to {addr} timed out"),
                )))
            })??;

        Ok(Self {
            handler,
            events: Mutex::new(Some(events)),
        })
    }

    /// The connection core behind this client, for lifecycle inspection or
    /// attaching an observer.
    pub fn handler(&self) -> &Arc<CommandHandler> {
        &self.handler
    }

    /// Takes ownership of the connection's user event stream. Returns
    /// `None` after the first call.
    pub fn take_event_receiver(&self) -> Option<mpsc::UnboundedReceiver<ConnectionEvent>> {
        self.events.lock().take()
    }

    /// Submits a raw command and returns the receiver for its reply.
    pub fn dispatch(&self, name: &str, args: Vec<Bytes>) -> Result<ResponseReceiver, ClientError> {
        let (command, response) = RedisCommand::new(name, args);
        self.handler.write(command)?;
        Ok(response)
    }

    /// Submits a raw command and awaits its reply.
    pub async fn execute(&self, name: &str, args: Vec<Bytes>) -> Result<RespFrame, ClientError> {
        let response = self.dispatch(name, args)?;
        response.await.map_err(|_| {
            ClientError::Internal("connection dropped the command without completing it".to_string())
        })?
    }

    /// PING. True when the server answered PONG.
    pub async fn ping(&self) -> Result<bool, ClientError> {
        match self.execute("PING", Vec::new()).await? {
            RespFrame::SimpleString(s) => Ok(s == "PONG"),
            RespFrame::BulkString(b) => Ok(b.as_ref() == b"PONG"),
            _ => Ok(false),
        }
    }

    /// GET key.
    pub async fn get(&self, key: &str) -> Result<Option<Bytes>, ClientError> {
        match self
            .execute("GET", vec![Bytes::copy_from_slice(key.as_bytes())])
            .await?
        {
            RespFrame::Null => Ok(None),
            RespFrame::BulkString(data) => Ok(Some(data)),
            RespFrame::SimpleString(s) => Ok(Some(Bytes::from(s.into_bytes()))),
            other => Err(ClientError::Protocol(format!(
                "unexpected GET response: {other:?}"
            ))),
        }
    }

    /// SET key value.
    pub async fn set(&self, key: &str, value: &[u8]) -> Result<(), ClientError> {
        self.execute(
            "SET",
            vec![
                Bytes::copy_from_slice(key.as_bytes()),
                Bytes::copy_from_slice(value),
            ],
        )
        .await?;
        Ok(())
    }

    /// DEL key. Returns the number of keys removed.
    pub async fn del(&self, key: &str) -> Result<i64, ClientError> {
        match self
            .execute("DEL", vec![Bytes::copy_from_slice(key.as_bytes())])
            .await?
        {
            RespFrame::Integer(n) => Ok(n),
            other => Err(ClientError::Protocol(format!(
                "unexpected DEL response: {other:?}"
            ))),
        }
    }

    /// Cancels everything in flight and clears decode state.
    pub fn reset(&self) {
        self.handler.reset();
    }

    pub fn is_closed(&self) -> bool {
        self.handler.is_closed()
    }

    /// Closes the connection and resolves once the transport has shut down.
    pub async fn close(&self) {
        self.handler.close().await;
    }
}
