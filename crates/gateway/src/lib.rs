//! Per-request orchestration between the HTTP surface and remote storage.
//!
//! Each [`TransferGateway`] operation opens exactly one session, runs its
//! remote calls sequentially, and closes the session on every exit path.
//! Bytes in transit are held in the staging area and released when the
//! operation (or, for downloads, the response body) is done with them.

mod error;
mod gateway;
mod session;

pub use error::{ErrorKind, GatewayError};
pub use gateway::{Download, TransferGateway};
pub use session::SessionState;

use nasrelay_storage::Credentials;

/// Immutable settings shared by every request.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub credentials: Credentials,
    /// Remote folder every client path is relative to.
    pub base_path: String,
}
