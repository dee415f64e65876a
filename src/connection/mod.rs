// src/connection/mod.rs

//! The client connection core: command write path, response read path,
//! disconnect buffering, and the lifecycle state machine, plus the seams
//! it is driven through (transport, events, observer) and the tokio TCP
//! transport implementation.

// Declare the sub-modules of the `connection` module.
pub mod events;
pub mod handler;
pub mod lifecycle;
pub mod tcp;
pub mod transport;

// Publicly re-export the primary types from the sub-modules.
pub use events::{ConnectionEvent, ConnectionObserver};
pub use handler::CommandHandler;
pub use lifecycle::LifecycleState;
pub use tcp::TcpTransport;
pub use transport::{DeferredTask, Transport, WritePromise};
