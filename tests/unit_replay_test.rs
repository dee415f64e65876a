// tests/unit_replay_test.rs

mod common;

use common::{attach, cmd, MockTransport};
use spineldb_client::config::ClientOptions;
use spineldb_client::connection::events::{ConnectionEvent, ConnectionObserver};
use spineldb_client::connection::handler::CommandHandler;
use spineldb_client::core::ClientError;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn reconnecting_handler() -> CommandHandler {
    CommandHandler::new(Arc::new(ClientOptions {
        auto_reconnect: true,
        ..ClientOptions::default()
    }))
}

#[tokio::test]
async fn test_activation_replays_buffered_commands() {
    let handler = reconnecting_handler();

    // Written before any transport exists: held.
    let (command, rx) = cmd("SET");
    handler.write(command).unwrap();
    assert_eq!(handler.buffered_command_count(), 1);

    let transport = MockTransport::new();
    attach(&handler, &transport);

    assert_eq!(handler.buffered_command_count(), 0);
    assert_eq!(handler.pending_response_count(), 1);
    assert_eq!(transport.written_names(), vec!["SET"]);

    handler.on_read(b"+OK\r\n");
    assert!(rx.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_replay_writes_held_commands_before_unacknowledged_ones() {
    let handler = reconnecting_handler();
    let first = MockTransport::new();
    attach(&handler, &first);

    // In flight on the first transport, never acknowledged.
    let (unacked, _rx1) = cmd("OLD");
    handler.write(unacked).unwrap();

    first.set_active(false);
    handler.on_inactive();

    // Accepted while down: held.
    let (held, _rx2) = cmd("NEW");
    handler.write(held).unwrap();
    assert_eq!(handler.buffered_command_count(), 1);
    assert_eq!(handler.pending_response_count(), 1);

    // Reconnect: the holding buffer drains before the old dispatch queue.
    let second = MockTransport::new();
    attach(&handler, &second);
    assert_eq!(second.written_names(), vec!["NEW", "OLD"]);
}

#[tokio::test]
async fn test_cancelled_commands_are_skipped_on_replay() {
    let handler = reconnecting_handler();

    let (command, rx) = cmd("SET");
    handler.write(Arc::clone(&command)).unwrap();
    command.cancel();

    let transport = MockTransport::new();
    attach(&handler, &transport);

    assert!(transport.written_names().is_empty());
    assert_eq!(handler.buffered_command_count(), 0);
    assert_eq!(handler.pending_response_count(), 0);
    assert!(matches!(rx.await.unwrap(), Err(ClientError::Cancelled(_))));
}

struct FailingObserver;

impl ConnectionObserver for FailingObserver {
    fn activated(&self) -> Result<(), ClientError> {
        Err(ClientError::Internal("activation refused".to_string()))
    }

    fn deactivated(&self) {}
}

#[tokio::test]
async fn test_activation_failure_cancels_commands_when_configured() {
    let handler = CommandHandler::new(Arc::new(ClientOptions {
        auto_reconnect: true,
        cancel_commands_on_reconnect_failure: true,
        ..ClientOptions::default()
    }));
    handler.set_observer(Arc::new(FailingObserver));

    let (command, rx) = cmd("SET");
    handler.write(command).unwrap();

    let transport = MockTransport::new();
    handler.on_registered(transport.clone());
    let result = handler.on_active(transport.clone());

    assert!(result.is_err());
    assert_eq!(handler.buffered_command_count(), 0);
    assert_eq!(handler.pending_response_count(), 0);
    match rx.await.unwrap() {
        Err(ClientError::Cancelled(reason)) => assert_eq!(reason, "Reset"),
        other => panic!("expected cancellation, got {other:?}"),
    }
}

#[tokio::test]
async fn test_activation_failure_keeps_commands_when_not_configured() {
    let handler = CommandHandler::new(Arc::new(ClientOptions {
        auto_reconnect: true,
        cancel_commands_on_reconnect_failure: false,
        ..ClientOptions::default()
    }));
    handler.set_observer(Arc::new(FailingObserver));

    let (command, mut rx) = cmd("SET");
    handler.write(command).unwrap();

    let transport = MockTransport::new();
    handler.on_registered(transport.clone());
    assert!(handler.on_active(transport.clone()).is_err());

    // The command survives, held for the next activation attempt.
    assert_eq!(handler.buffered_command_count(), 1);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_activation_clears_cached_connection_error() {
    let handler = reconnecting_handler();

    let cause: ClientError =
        std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused").into();
    assert!(handler.on_exception(cause).is_none());

    let transport = MockTransport::new();
    attach(&handler, &transport);

    // The cached cause is gone: a fresh write goes to the transport
    // instead of failing fast.
    let (command, mut rx) = cmd("GET");
    handler.write(command).unwrap();
    assert_eq!(transport.written_names(), vec!["GET"]);
    assert!(rx.try_recv().is_err());
}

#[derive(Default)]
struct CountingObserver {
    activations: AtomicUsize,
    deactivations: AtomicUsize,
}

impl ConnectionObserver for CountingObserver {
    fn activated(&self) -> Result<(), ClientError> {
        self.activations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn deactivated(&self) {
        self.deactivations.fetch_add(1, Ordering::Relaxed);
    }
}

#[tokio::test]
async fn test_observer_callbacks_and_deferred_activated_event() {
    let handler = reconnecting_handler();
    let observer = Arc::new(CountingObserver::default());
    handler.set_observer(Arc::clone(&observer) as Arc<dyn ConnectionObserver>);

    let transport = MockTransport::new();
    attach(&handler, &transport);

    assert_eq!(observer.activations.load(Ordering::Relaxed), 1);

    // The Activated user event fires only after the deferred task runs,
    // i.e. after the activation dispatch has unwound.
    assert!(transport.events.lock().is_empty());
    transport.run_deferred();
    assert_eq!(transport.events.lock().as_slice(), &[ConnectionEvent::Activated]);

    transport.set_active(false);
    handler.on_inactive();
    assert_eq!(observer.deactivations.load(Ordering::Relaxed), 1);
}
