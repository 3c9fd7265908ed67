//! The active user session.

use crate::error::{Error, Result};
use std::sync::RwLock;
use tracing::info;

/// Holds the session token of the active user, if any.
///
/// Credentials are read when a request is sent, never when it is captured,
/// so pending operations replay under whichever user is active at push time.
#[derive(Debug, Default)]
pub struct Session {
    token: RwLock<Option<String>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session starting with a token.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }

    pub fn login(&self, token: impl Into<String>) {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = Some(token.into());
        info!("Session started");
    }

    pub fn logout(&self) {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = None;
        info!("Session ended");
    }

    pub fn is_active(&self) -> bool {
        self.token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Token of the active user, or [`Error::NoActiveUser`].
    pub fn require(&self) -> Result<String> {
        self.token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(Error::NoActiveUser)
    }

    /// `Authorization` header value for the active user.
    pub fn authorization(&self) -> Result<String> {
        Ok(format!("Kinvey {}", self.require()?))
    }
}
