//! Credential provider boundary.
//!
//! Token storage and refresh belong to the authentication layer. The session
//! only reads the current bearer token through [`CredentialProvider`] before
//! every handshake and never writes it.

use std::sync::{Arc, RwLock};

/// Supplies the bearer token used for the handshake.
pub trait CredentialProvider: Send + Sync + std::fmt::Debug {
    /// Current token, or `None` when the user is signed out or the token expired.
    fn token(&self) -> Option<String>;
}

/// A token that can be replaced at runtime by whoever owns authentication.
#[derive(Debug, Clone, Default)]
pub struct SharedToken {
    inner: Arc<RwLock<Option<String>>>,
}

impl SharedToken {
    /// Create a provider holding `token`.
    #[must_use]
    pub fn new(token: Option<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(token.filter(|t| !t.is_empty()))),
        }
    }

    /// Replace the token (login / refresh).
    pub fn set(&self, token: impl Into<String>) {
        let token = token.into();
        if let Ok(mut guard) = self.inner.write() {
            *guard = (!token.is_empty()).then_some(token);
        }
    }

    /// Forget the token (logout / expiry).
    pub fn clear(&self) {
        if let Ok(mut guard) = self.inner.write() {
            *guard = None;
        }
    }
}

impl CredentialProvider for SharedToken {
    fn token(&self) -> Option<String> {
        self.inner.read().ok().and_then(|guard| guard.clone())
    }
}

/// Reads the token from an environment variable on every call.
#[derive(Debug, Clone)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    /// Provider backed by `var` (e.g. `SNET_TOKEN`).
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl CredentialProvider for EnvToken {
    fn token(&self) -> Option<String> {
        std::env::var(&self.var).ok().filter(|t| !t.is_empty())
    }
}
