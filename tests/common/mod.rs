// tests/common/mod.rs

//! Shared test fixtures: a scripted in-memory transport that records what
//! the handler does to it.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use spineldb_client::connection::events::ConnectionEvent;
use spineldb_client::connection::handler::CommandHandler;
use spineldb_client::connection::transport::{DeferredTask, Transport, WritePromise};
use spineldb_client::core::command::{RedisCommand, ResponseReceiver};
use spineldb_client::core::ClientError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// An in-memory transport double. Writes are recorded and their promises
/// resolved immediately; a queued failure makes the next write's promise
/// fail instead.
pub struct MockTransport {
    remote: SocketAddr,
    active: AtomicBool,
    pub written: Mutex<Vec<Arc<RedisCommand>>>,
    pub flushes: AtomicUsize,
    pub events: Mutex<Vec<ConnectionEvent>>,
    deferred: Mutex<Vec<DeferredTask>>,
    next_write_failure: Mutex<Option<ClientError>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            remote: "127.0.0.1:7878".parse().unwrap(),
            active: AtomicBool::new(true),
            written: Mutex::new(Vec::new()),
            flushes: AtomicUsize::new(0),
            events: Mutex::new(Vec::new()),
            deferred: Mutex::new(Vec::new()),
            next_write_failure: Mutex::new(None),
        })
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    /// Makes the next write's promise resolve with `cause`.
    pub fn fail_next_write(&self, cause: ClientError) {
        *self.next_write_failure.lock() = Some(cause);
    }

    pub fn written_names(&self) -> Vec<String> {
        self.written
            .lock()
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }

    /// Runs everything submitted to the I/O context since the last call.
    pub fn run_deferred(&self) {
        let tasks: Vec<DeferredTask> = self.deferred.lock().drain(..).collect();
        for task in tasks {
            task();
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(self.remote)
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn write(&self, command: Arc<RedisCommand>, promise: WritePromise) {
        if let Some(cause) = self.next_write_failure.lock().take() {
            promise.complete(Err(cause));
            return;
        }
        self.written.lock().push(command);
        promise.complete(Ok(()));
    }

    fn flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    fn fire_event(&self, event: ConnectionEvent) {
        self.events.lock().push(event);
    }

    fn submit(&self, task: DeferredTask) {
        self.deferred.lock().push(task);
    }

    async fn close(&self) {
        self.active.store(false, Ordering::Release);
    }
}

/// Registers and activates `handler` on `transport`, as a connecting
/// transport driver would.
pub fn attach(handler: &CommandHandler, transport: &Arc<MockTransport>) {
    handler.on_registered(transport.clone());
    handler
        .on_active(transport.clone())
        .expect("activation should succeed");
}

/// A command with the standard output sink and no arguments.
pub fn cmd(name: &str) -> (Arc<RedisCommand>, ResponseReceiver) {
    RedisCommand::new(name, Vec::new())
}
