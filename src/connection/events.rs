// src/connection/events.rs

//! Connection-scoped user events and the upper-layer observer seam.

use crate::core::ClientError;

/// Events fired into the transport's event stream for upper layers
/// (reconnect supervisors, pools) to react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The connection finished activating and replayed its queued commands.
    /// Fired from the I/O context after the activation call chain unwinds.
    Activated,
    /// Close was requested; fired before the transport starts shutting down.
    PrepareClose,
    /// The transport should shut down now.
    Close,
}

/// Optional upper-layer handler notified around activation and deactivation.
///
/// `activated` runs on the I/O context with the handler's write lock held,
/// before buffered commands are replayed; returning an error aborts
/// activation and surfaces to the transport. `deactivated` runs during the
/// disconnect transition.
pub trait ConnectionObserver: Send + Sync {
    fn activated(&self) -> Result<(), ClientError>;
    fn deactivated(&self);
}
