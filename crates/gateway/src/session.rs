//! Per-request session scope.
//!
//! A [`SessionScope`] owns the one session a gateway operation uses. The
//! operation calls [`SessionScope::close`] on every normal exit path; if
//! the request future is cancelled instead, dropping the scope hands the
//! session to the runtime to be closed in the background.

use nasrelay_storage::{Credentials, RemoteSession, StorageBackend, StorageError};
use tracing::{debug, warn};

use crate::GatewayError;

/// Lifecycle of a per-request session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    SessionOpen,
    Working,
    SessionClosing,
    Closed,
}

pub(crate) struct SessionScope {
    session: Option<Box<dyn RemoteSession>>,
    state: SessionState,
    operation: &'static str,
}

impl SessionScope {
    /// Opens a session for `operation`.
    pub(crate) async fn open(
        backend: &dyn StorageBackend,
        credentials: &Credentials,
        operation: &'static str,
    ) -> Result<Self, GatewayError> {
        let mut scope = Self {
            session: None,
            state: SessionState::Idle,
            operation,
        };

        let session = backend.open(credentials).await?;
        scope.session = Some(session);
        scope.transition(SessionState::SessionOpen);
        debug!(operation, backend = %backend.kind(), "session opened");
        Ok(scope)
    }

    /// The open session.
    pub(crate) fn session(&mut self) -> Result<&dyn RemoteSession, GatewayError> {
        if self.state == SessionState::SessionOpen {
            self.transition(SessionState::Working);
        }
        self.session
            .as_deref()
            .ok_or_else(|| StorageError::Protocol("session already closed".into()).into())
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    /// Closes the session. Close failures are logged by the backend.
    pub(crate) async fn close(mut self) {
        self.transition(SessionState::SessionClosing);
        if let Some(session) = self.session.take() {
            session.close().await;
        }
        self.transition(SessionState::Closed);
        debug!(operation = self.operation, "session closed");
    }

    fn transition(&mut self, next: SessionState) {
        debug!(operation = self.operation, from = ?self.state, to = ?next, "session state");
        self.state = next;
    }
}

impl Drop for SessionScope {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(operation = self.operation, "closing abandoned session");
                handle.spawn(session.close());
            }
            Err(_) => {
                warn!(operation = self.operation, "session dropped outside runtime; not closed");
            }
        }
    }
}
