// tests/unit_write_path_test.rs

mod common;

use common::{attach, cmd, MockTransport};
use spineldb_client::config::ClientOptions;
use spineldb_client::connection::handler::CommandHandler;
use spineldb_client::core::ClientError;
use std::sync::Arc;
use std::sync::atomic::Ordering;

fn handler_with(auto_reconnect: bool) -> CommandHandler {
    let options = ClientOptions {
        auto_reconnect,
        ..ClientOptions::default()
    };
    CommandHandler::new(Arc::new(options))
}

#[tokio::test]
async fn test_write_on_active_transport_writes_and_flushes() {
    let handler = handler_with(true);
    let transport = MockTransport::new();
    attach(&handler, &transport);

    let (command, _rx) = cmd("GET");
    handler.write(command).unwrap();

    assert_eq!(transport.written_names(), vec!["GET"]);
    assert_eq!(handler.pending_response_count(), 1);
    assert_eq!(handler.buffered_command_count(), 0);
    assert!(transport.flushes.load(Ordering::Relaxed) >= 1);
}

#[tokio::test]
async fn test_fire_and_forget_completes_on_write_acceptance() {
    let handler = handler_with(true);
    let transport = MockTransport::new();
    attach(&handler, &transport);

    let (command, rx) = spineldb_client::core::command::RedisCommand::fire_and_forget(
        "CLIENT",
        Vec::new(),
    );
    handler.write(command).unwrap();

    // No reply is expected, so the command never enters the dispatch queue
    // but its bytes are still written.
    assert_eq!(handler.pending_response_count(), 0);
    assert_eq!(transport.written_names(), vec!["CLIENT"]);
    assert!(rx.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_write_against_closed_handler_errors_synchronously() {
    let handler = handler_with(true);
    handler.close().await;

    let (command, mut rx) = cmd("GET");
    let result = handler.write(command);

    assert!(matches!(result, Err(ClientError::ConnectionClosed)));
    // The command itself is untouched: the caller saw the error instead.
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_write_disconnected_with_reconnect_disabled_fails_command() {
    let handler = handler_with(false);

    let (command, rx) = cmd("SET");
    let returned = handler.write(command).unwrap();

    assert!(returned.is_done());
    assert!(matches!(
        rx.await.unwrap(),
        Err(ClientError::ReconnectDisabled)
    ));
}

#[tokio::test]
async fn test_write_disconnected_buffers_command() {
    let handler = handler_with(true);

    let (command, mut rx) = cmd("SET");
    handler.write(command).unwrap();

    assert_eq!(handler.buffered_command_count(), 1);
    assert_eq!(handler.pending_response_count(), 0);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_resubmitting_buffered_command_is_idempotent() {
    let handler = handler_with(true);

    let (command, _rx) = cmd("SET");
    handler.write(Arc::clone(&command)).unwrap();
    handler.write(command).unwrap();

    assert_eq!(handler.buffered_command_count(), 1);
}

#[tokio::test]
async fn test_write_fails_fast_with_cached_connection_error() {
    let handler = handler_with(true);

    // A transport-level failure observed while down is cached...
    let cause: ClientError =
        std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused").into();
    assert!(handler.on_exception(cause).is_none());

    // ...and fails the next write immediately instead of buffering it.
    let (command, rx) = cmd("GET");
    handler.write(command).unwrap();

    assert_eq!(handler.buffered_command_count(), 0);
    assert!(matches!(rx.await.unwrap(), Err(ClientError::Io(_))));
}

#[tokio::test]
async fn test_at_most_once_write_failure_removes_command_from_queue() {
    let handler = handler_with(false);
    let transport = MockTransport::new();
    attach(&handler, &transport);

    transport.fail_next_write(
        std::io::Error::new(std::io::ErrorKind::BrokenPipe, "broken pipe").into(),
    );

    let (command, rx) = cmd("SET");
    handler.write(command).unwrap();

    // The write callback failed the command and pruned the ghost entry.
    assert_eq!(handler.pending_response_count(), 0);
    assert!(matches!(rx.await.unwrap(), Err(ClientError::Io(_))));
}

#[tokio::test]
async fn test_at_least_once_write_failure_keeps_command_queued() {
    let handler = handler_with(true);
    let transport = MockTransport::new();
    attach(&handler, &transport);

    transport.fail_next_write(
        std::io::Error::new(std::io::ErrorKind::BrokenPipe, "broken pipe").into(),
    );

    let (command, mut rx) = cmd("SET");
    handler.write(command).unwrap();

    // Void promise: the failure is discarded here and would surface via
    // the transport exception path; the command stays queued for replay.
    assert_eq!(handler.pending_response_count(), 1);
    assert!(rx.try_recv().is_err());
}
