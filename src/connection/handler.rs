// src/connection/handler.rs

//! Defines the `CommandHandler`, the core of a client connection: it writes
//! commands to the transport in submission order, correlates inbound bytes
//! back to the oldest in-flight command, buffers commands across
//! disconnects according to the reliability mode, and drives the
//! connection lifecycle state machine.
//!
//! Two execution contexts meet here. Producer threads call [`write`],
//! [`reset`], and [`close`]; the transport's single-threaded I/O task
//! delivers lifecycle events and inbound bytes through the `on_*` methods.
//! A dedicated write lock serializes the write critical section across
//! producers; a separate, shorter-scoped state lock guards the lifecycle
//! state and the transport reference. Neither lock is ever held across an
//! `.await`.
//!
//! [`write`]: CommandHandler::write
//! [`reset`]: CommandHandler::reset
//! [`close`]: CommandHandler::close

use crate::config::ClientOptions;
use crate::connection::events::{ConnectionEvent, ConnectionObserver};
use crate::connection::lifecycle::LifecycleState;
use crate::connection::transport::{Transport, WritePromise};
use crate::core::ClientError;
use crate::core::command::RedisCommand;
use crate::core::protocol::RespStateMachine;
use bytes::BytesMut;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Initial capacity of the inbound byte accumulator.
const INBOUND_BUFFER_CAPACITY: usize = 4 * 1024;

/// Delivery guarantee for commands on this connection, fixed at
/// construction from the reconnect setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reliability {
    /// No reconnect housekeeping: a failed write fails its command.
    AtMostOnce,
    /// Commands survive in the queues and are replayed on reconnect.
    AtLeastOnce,
}

/// State guarded by the state lock: the lifecycle phase, the current
/// transport attachment, the cached connection error, and the memoized log
/// prefix.
struct SharedState {
    lifecycle: LifecycleState,
    transport: Option<Arc<dyn Transport>>,
    connection_error: Option<ClientError>,
    log_prefix: Option<String>,
}

/// The client-side connection core. See the module docs for the execution
/// model.
pub struct CommandHandler {
    options: Arc<ClientOptions>,
    reliability: Reliability,
    /// Commands written to the transport, awaiting a reply. FIFO by write
    /// order; the read path completes strictly from the head. Shared with
    /// at-most-once write callbacks, which prune failed writes by identity.
    queue: Arc<Mutex<VecDeque<Arc<RedisCommand>>>>,
    /// Commands accepted while the transport was unavailable, drained on
    /// activation.
    command_buffer: Mutex<VecDeque<Arc<RedisCommand>>>,
    /// Inbound byte accumulator. Allocated on registration, released on
    /// unregistration; `None` outside that window.
    buffer: Mutex<Option<BytesMut>>,
    /// The streaming reply decoder, fresh per registration.
    decoder: Mutex<Option<RespStateMachine>>,
    state: Mutex<SharedState>,
    /// Serializes the write critical section across producers and the
    /// activation replay.
    write_lock: Mutex<()>,
    observer: Mutex<Option<Arc<dyn ConnectionObserver>>>,
}

impl CommandHandler {
    pub fn new(options: Arc<ClientOptions>) -> Self {
        let reliability = if options.auto_reconnect {
            Reliability::AtLeastOnce
        } else {
            Reliability::AtMostOnce
        };
        Self {
            options,
            reliability,
            queue: Arc::new(Mutex::new(VecDeque::new())),
            command_buffer: Mutex::new(VecDeque::new()),
            buffer: Mutex::new(None),
            decoder: Mutex::new(None),
            state: Mutex::new(SharedState {
                lifecycle: LifecycleState::NotConnected,
                transport: None,
                connection_error: None,
                log_prefix: None,
            }),
            write_lock: Mutex::new(()),
            observer: Mutex::new(None),
        }
    }

    /// Registers the optional upper-layer observer that receives
    /// `activated` / `deactivated` callbacks.
    pub fn set_observer(&self, observer: Arc<dyn ConnectionObserver>) {
        *self.observer.lock() = Some(observer);
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.state.lock().lifecycle
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle_state().is_closed()
    }

    /// Number of commands written and awaiting a reply.
    pub fn pending_response_count(&self) -> usize {
        self.queue.lock().len()
    }

    /// Number of commands held while the transport is unavailable.
    pub fn buffered_command_count(&self) -> usize {
        self.command_buffer.lock().len()
    }

    // --- Write path -----------------------------------------------------

    /// Submits a command for execution.
    ///
    /// Fails synchronously only when the handler is closed; every other
    /// failure mode completes the command exceptionally and returns it, so
    /// the producer observes the outcome through the command itself.
    pub fn write(
        &self,
        command: Arc<RedisCommand>,
    ) -> Result<Arc<RedisCommand>, ClientError> {
        if self.lifecycle_state().is_closed() {
            return Err(ClientError::ConnectionClosed);
        }

        let (transport, connected) = {
            let state = self.state.lock();
            (state.transport.clone(), state.lifecycle.is_connected())
        };
        if (transport.is_none() || !connected) && !self.options.auto_reconnect {
            command.complete_exceptionally(ClientError::ReconnectDisabled);
            return Ok(command);
        }

        {
            let _write = self.write_lock.lock();
            self.write_locked(&command);
        }
        debug!("{} write() done", self.log_prefix());
        Ok(command)
    }

    /// The write critical section. Callers must hold the write lock; the
    /// activation replay re-enters here without re-acquiring it.
    fn write_locked(&self, command: &Arc<RedisCommand>) {
        // Re-read under the lock: activation and disconnect may have raced
        // with the pre-checks.
        let (transport, connected) = {
            let state = self.state.lock();
            (state.transport.clone(), state.lifecycle.is_connected())
        };

        match transport {
            Some(transport) if connected && transport.is_active() => {
                debug!(
                    "{} write() writing command {:?}",
                    self.log_prefix(),
                    command
                );
                match self.reliability {
                    Reliability::AtMostOnce => {
                        self.on_outbound_write(command);
                        // No reconnect housekeeping in this mode: a failed
                        // write must not leave a ghost entry blocking later
                        // replies, so the completion callback prunes it.
                        let sent = Arc::clone(command);
                        let queue = Arc::clone(&self.queue);
                        transport.write(
                            Arc::clone(command),
                            WritePromise::notify(move |result| {
                                if let Err(cause) = result {
                                    sent.complete_exceptionally(cause);
                                    queue.lock().retain(|queued| queued.id() != sent.id());
                                }
                            }),
                        );
                        transport.flush();
                    }
                    Reliability::AtLeastOnce => {
                        self.on_outbound_write(command);
                        // Void promise: write failures surface through the
                        // transport exception path, and the command stays
                        // queued for the next reconnect to replay.
                        transport.write(Arc::clone(command), WritePromise::Void);
                        transport.flush();
                    }
                }
            }
            _ => {
                // Re-submission of a command that is already queued or
                // buffered must stay idempotent.
                if self.is_pending(command) {
                    return;
                }

                let cached = self.state.lock().connection_error.clone();
                if let Some(cause) = cached {
                    debug!(
                        "{} write() completing command {:?} due to connection error",
                        self.log_prefix(),
                        command
                    );
                    command.complete_exceptionally(cause);
                    return;
                }

                debug!("{} write() buffering command {:?}", self.log_prefix(), command);
                self.command_buffer.lock().push_back(Arc::clone(command));
            }
        }
    }

    /// The transport-adjacent write hook, the sole entry point that extends
    /// the dispatch queue. A command without an output sink expects no
    /// reply and completes as soon as the transport accepts it; the bytes
    /// are still forwarded either way.
    fn on_outbound_write(&self, command: &Arc<RedisCommand>) {
        if command.has_output() {
            self.queue.lock().push_back(Arc::clone(command));
        } else {
            command.complete();
        }
    }

    fn is_pending(&self, command: &RedisCommand) -> bool {
        self.command_buffer
            .lock()
            .iter()
            .any(|buffered| buffered.id() == command.id())
            || self.queue.lock().iter().any(|queued| queued.id() == command.id())
    }

    // --- Read path ------------------------------------------------------

    /// Feeds an inbound byte chunk to the decoder, completing commands off
    /// the dispatch queue head for every full reply.
    pub fn on_read(&self, input: &[u8]) {
        if input.is_empty() {
            return;
        }

        let mut failure = None;
        {
            let mut buffer_slot = self.buffer.lock();
            let Some(buffer) = buffer_slot.as_mut() else {
                // Not registered (or already unregistered); drop the chunk.
                return;
            };
            buffer.extend_from_slice(input);

            trace!(
                "{} received: {}",
                self.log_prefix(),
                String::from_utf8_lossy(buffer).trim()
            );

            loop {
                let (command, depth) = {
                    let queue = self.queue.lock();
                    (queue.front().cloned(), queue.len())
                };
                let Some(command) = command else {
                    // No command in flight: bytes stay accumulated until
                    // one is written.
                    break;
                };
                debug!("{} dispatch queue contains {} command(s)", self.log_prefix(), depth);

                let decoded = {
                    let mut decoder = self.decoder.lock();
                    match decoder.as_mut() {
                        Some(decoder) => decoder.decode(buffer, &command),
                        None => break,
                    }
                };
                match decoded {
                    Ok(true) => {
                        // The decoder consumed a full reply and advanced
                        // the buffer cursor past it.
                        if let Some(finished) = self.queue.lock().pop_front() {
                            finished.complete();
                        }
                    }
                    Ok(false) => break,
                    Err(cause) => {
                        failure = Some(cause);
                        break;
                    }
                }
            }
        }

        if let Some(cause) = failure
            && let Some(unhandled) = self.on_exception(cause)
        {
            warn!("{} unhandled protocol error: {}", self.log_prefix(), unhandled);
        }
    }

    // --- Lifecycle driver -----------------------------------------------

    /// The transport attached this handler to a channel. Allocates the
    /// inbound accumulator and a fresh decoder.
    pub fn on_registered(&self, transport: Arc<dyn Transport>) {
        self.set_state_if_not_closed(LifecycleState::Registered);
        *self.buffer.lock() = Some(BytesMut::with_capacity(INBOUND_BUFFER_CAPACITY));
        *self.decoder.lock() = Some(RespStateMachine::new());
        let mut state = self.state.lock();
        state.transport = Some(transport);
        state.log_prefix = None;
    }

    /// The transport finished its handshake and is writable. Replays
    /// buffered commands and schedules the `Activated` notification for
    /// after the current dispatch unwinds.
    ///
    /// An error from the replay (observer activation failure) is re-raised
    /// to the transport; when `cancel_commands_on_reconnect_failure` is set
    /// the handler resets first.
    pub fn on_active(&self, transport: Arc<dyn Transport>) -> Result<(), ClientError> {
        self.state.lock().log_prefix = None;
        debug!("{} on_active()", self.log_prefix());
        self.set_state_if_not_closed(LifecycleState::Connected);

        if let Err(cause) = self.execute_queued_commands(&transport) {
            debug!("{} on_active() ran into an exception", self.log_prefix());
            if self.options.cancel_commands_on_reconnect_failure {
                self.reset();
            }
            return Err(cause);
        }

        let notifier = Arc::clone(&transport);
        transport.submit(Box::new(move || {
            notifier.fire_event(ConnectionEvent::Activated);
        }));

        debug!("{} on_active() done", self.log_prefix());
        Ok(())
    }

    /// Drains the holding buffer and the dispatch queue into a replay pass
    /// under the write lock: holding buffer first, then previously written
    /// commands, skipping anything already cancelled.
    fn execute_queued_commands(
        &self,
        transport: &Arc<dyn Transport>,
    ) -> Result<(), ClientError> {
        let _write = self.write_lock.lock();

        self.state.lock().connection_error = None;

        let pending: Vec<Arc<RedisCommand>> = {
            let mut buffered = self.command_buffer.lock();
            let mut queued = self.queue.lock();
            let mut pending = Vec::with_capacity(buffered.len() + queued.len());
            pending.extend(buffered.drain(..));
            pending.extend(queued.drain(..));
            pending
        };

        debug!(
            "{} executeQueuedCommands: {} command(s) queued",
            self.log_prefix(),
            pending.len()
        );

        self.state.lock().transport = Some(Arc::clone(transport));

        let observer = self.observer.lock().clone();
        if let Some(observer) = observer {
            debug!("{} activating connection observer", self.log_prefix());
            self.set_state_if_not_closed(LifecycleState::Activating);
            if let Err(cause) = observer.activated() {
                // Put the drained commands back into the holding buffer so
                // they remain cancellable and eligible for the next
                // activation. Producers are blocked on the write lock, so
                // the buffer is still empty here.
                self.command_buffer.lock().extend(pending);
                return Err(cause);
            }
        }
        self.set_state_if_not_closed(LifecycleState::Active);

        for command in pending {
            if !command.is_cancelled() {
                debug!(
                    "{} on_active() retriggering command {:?}",
                    self.log_prefix(),
                    command
                );
                // The write lock is already held; re-enter the critical
                // section directly. With the transport now active this
                // writes through, or buffers again if a disconnect raced.
                self.write_locked(&command);
            }
        }
        Ok(())
    }

    /// The transport lost its peer. Walks the deactivation states and
    /// clears decode state; the accumulator survives until unregistration.
    pub fn on_inactive(&self) {
        debug!("{} on_inactive()", self.log_prefix());
        self.set_state_if_not_closed(LifecycleState::Disconnected);

        let observer = self.observer.lock().clone();
        if let Some(observer) = observer {
            debug!("{} deactivating connection observer", self.log_prefix());
            self.set_state_if_not_closed(LifecycleState::Deactivating);
            observer.deactivated();
        }
        self.set_state_if_not_closed(LifecycleState::Deactivated);

        let mut buffer_slot = self.buffer.lock();
        if let Some(buffer) = buffer_slot.as_mut() {
            if let Some(decoder) = self.decoder.lock().as_mut() {
                decoder.reset();
            }
            buffer.clear();
        }
        debug!("{} on_inactive() done", self.log_prefix());
    }

    /// The transport detached. Releases the accumulator exactly once and,
    /// when the handler was closed first, cancels everything still queued.
    pub fn on_unregistered(&self) {
        *self.buffer.lock() = None;

        if self.lifecycle_state().is_closed() {
            self.cancel_commands("Connection closed");
        }
        self.state.lock().transport = None;
    }

    /// An error surfaced on the I/O context. The oldest unacknowledged
    /// command absorbs it; with the transport down the cause is cached so
    /// subsequent writes fail fast. Returns the cause when it should keep
    /// propagating outward.
    pub fn on_exception(&self, cause: ClientError) -> Option<ClientError> {
        debug!("{} on_exception() {}", self.log_prefix(), cause);

        if let Some(command) = self.queue.lock().pop_front() {
            debug!("{} storing exception in command {:?}", self.log_prefix(), command);
            command.complete_exceptionally(cause.clone());
        }

        let (transport, connected) = {
            let state = self.state.lock();
            (state.transport.clone(), state.lifecycle.is_connected())
        };
        let active = transport.as_ref().is_some_and(|t| t.is_active());
        if transport.is_none() || !active || !connected {
            debug!("{} storing exception as connection error", self.log_prefix());
            self.state.lock().connection_error = Some(cause);
            return None;
        }
        Some(cause)
    }

    // --- Reset and close ------------------------------------------------

    /// Cancels every queued and buffered command and clears all decode
    /// state. The coarse recovery primitive when the connection state gets
    /// out of sync.
    pub fn reset(&self) {
        debug!("{} reset()", self.log_prefix());
        {
            let _write = self.write_lock.lock();
            self.cancel_commands("Reset");
        }

        let mut buffer_slot = self.buffer.lock();
        if let Some(buffer) = buffer_slot.as_mut() {
            if let Some(decoder) = self.decoder.lock().as_mut() {
                decoder.reset();
            }
            buffer.clear();
        }
    }

    /// Closes the connection. Transitions to the terminal state, announces
    /// `PrepareClose` and `Close` to the transport, and resolves once the
    /// transport has shut down. Idempotent.
    pub async fn close(&self) {
        debug!("{} close()", self.log_prefix());

        let transport = {
            let mut state = self.state.lock();
            if state.lifecycle.is_closed() {
                return;
            }
            state.lifecycle = LifecycleState::Closed;
            state.transport.clone()
        };

        if let Some(transport) = transport {
            transport.fire_event(ConnectionEvent::PrepareClose);
            transport.fire_event(ConnectionEvent::Close);
            transport.close().await;
        }
    }

    fn cancel_commands(&self, message: &str) {
        let mut cancelled: Vec<Arc<RedisCommand>> = Vec::new();
        cancelled.extend(self.queue.lock().drain(..));
        cancelled.extend(self.command_buffer.lock().drain(..));

        debug!(
            "{} cancelling {} command(s): {}",
            self.log_prefix(),
            cancelled.len(),
            message
        );
        for command in cancelled {
            if command.has_output() {
                command.set_output_error(message);
            }
            command.cancel();
        }
    }

    // --- State management -----------------------------------------------

    /// All transitions funnel through here; once closed, the lifecycle is
    /// frozen.
    fn set_state_if_not_closed(&self, next: LifecycleState) {
        let mut state = self.state.lock();
        if !state.lifecycle.is_closed() {
            debug!("lifecycle {:?} -> {:?}", state.lifecycle, next);
            state.lifecycle = next;
        }
    }

    fn log_prefix(&self) -> String {
        let mut state = self.state.lock();
        if let Some(prefix) = &state.log_prefix {
            return prefix.clone();
        }
        let prefix = match state.transport.as_ref().and_then(|t| t.remote_addr()) {
            Some(addr) => format!("[{addr}]"),
            None => "[not connected]".to_string(),
        };
        state.log_prefix = Some(prefix.clone());
        prefix
    }
}
