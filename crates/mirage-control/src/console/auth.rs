//! Console login and session resolution.

use std::time::Duration;

use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use mirage_core::db::DatabaseError;
use tracing::{info, instrument, warn};

use super::ConsoleService;
use crate::error::{ControlError, Result};
use crate::storage::User;

/// Name of the cookie carrying the console session token.
pub const SESSION_COOKIE: &str = "miragecontrol";

/// Upper bound on a session lookup.
const LOOKUP_DEADLINE: Duration = Duration::from_secs(1);

/// Hash a console password with argon2id and a random salt.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ControlError::Invalid(format!("password hashing: {e}")))
}

/// Check `password` against a stored hash. A missing or unreadable hash never matches.
pub fn verify_password(password: &str, stored: &str) -> bool {
    PasswordHash::new(stored).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
}

impl ConsoleService {
    /// Check credentials and open a session. Returns the token and the user.
    #[instrument(skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> Result<(String, User)> {
        let user = match self.db.get_user_by_name(username).await {
            Ok(u) => u,
            Err(DatabaseError::NotFound(_)) => {
                warn!("Login for unknown user");
                return Err(ControlError::Unauthorized("invalid credentials".into()));
            }
            Err(e) => return Err(e.into()),
        };
        if !verify_password(password, &user.password_hash) {
            warn!(user_id = user.id, "Failed login attempt");
            return Err(ControlError::Unauthorized("invalid credentials".into()));
        }

        let token = self.sessions.issue(user.id, self.session_ttl).await;
        info!(user_id = user.id, "Console login");
        Ok((token, user))
    }

    /// Resolve a session token to its user within a bounded deadline.
    pub async fn authenticate(&self, token: Option<&str>) -> Result<User> {
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ControlError::Unauthorized("no session".into()))?;

        let entry = tokio::time::timeout(LOOKUP_DEADLINE, self.sessions.resolve(token))
            .await
            .map_err(|_| ControlError::Timeout("session lookup".into()))?
            .ok_or_else(|| ControlError::Unauthorized("session expired or unknown".into()))?;

        self.db
            .get_user(entry.user_id)
            .await
            .map_err(|e| match e {
                DatabaseError::NotFound(_) => ControlError::Unauthorized("user gone".into()),
                other => other.into(),
            })
    }

    /// End a session.
    pub async fn logout(&self, token: &str) -> bool {
        self.sessions.remove(token).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let hash = hash_password("correct horse").unwrap();
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("battery staple", &hash));
    }

    #[test]
    fn empty_stored_hash_never_matches() {
        assert!(!verify_password("", ""));
        assert!(!verify_password("anything", "not-a-phc-string"));
    }
}
