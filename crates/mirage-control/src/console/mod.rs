//! Operator console: session login and machine administration.

pub mod auth;
mod machines;
pub mod session;
pub mod types;


use std::sync::Arc;
use std::time::Duration;

pub use auth::SESSION_COOKIE;
pub use session::SessionCache;

use crate::error::ControlError;
use crate::storage::ControlDatabase;

pub struct ConsoleService {
    db: ControlDatabase,
    sessions: Arc<SessionCache>,
    session_ttl: Duration,
    online_window_secs: i64,
}

impl ConsoleService {
    pub const fn new(
        db: ControlDatabase,
        sessions: Arc<SessionCache>,
        session_ttl: Duration,
        online_window_secs: i64,
    ) -> Self {
        Self {
            db,
            sessions,
            session_ttl,
            online_window_secs,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionCache> {
        &self.sessions
    }

    pub const fn session_ttl(&self) -> Duration {
        self.session_ttl
    }
}

/// Text shown to operators for a failed console call.
///
/// Authentication details and storage internals stay in the logs.
pub fn console_message(err: &ControlError) -> String {
    match err {
        ControlError::Unauthorized(_) | ControlError::KeyMismatch(_) => "unauthorized".into(),
        ControlError::NotFound(_) => "machine not found".into(),
        ControlError::Invalid(msg) => msg.clone(),
        ControlError::Json(_) => "malformed request".into(),
        ControlError::Database(_) | ControlError::Crypto(_) | ControlError::Timeout(_) => {
            "internal error".into()
        }
    }
}
