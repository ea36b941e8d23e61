//! Bearer credential access

use std::sync::Arc;

use parking_lot::RwLock;

/// Synchronous accessor for the current bearer token
///
/// Returning `None` is not an error: the stream simply stays closed.
pub trait CredentialSource: Send + Sync {
    /// The current bearer token, if signed in
    fn credential(&self) -> Option<String>;
}

impl<F> CredentialSource for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn credential(&self) -> Option<String> {
        self()
    }
}

/// Credential store shared with the auth layer
///
/// Clones share the same slot, so the auth layer can update the token after
/// a sign-in and the push client sees it on its next connection attempt.
#[derive(Debug, Clone, Default)]
pub struct SharedCredential {
    token: Arc<RwLock<Option<String>>>,
}

impl SharedCredential {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding a token
    pub fn with_token(token: impl Into<String>) -> Self {
        let store = Self::new();
        store.set(token);
        store
    }

    /// Replace the stored token
    pub fn set(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
    }

    /// Forget the stored token (sign-out)
    pub fn clear(&self) {
        *self.token.write() = None;
    }
}

impl CredentialSource for SharedCredential {
    fn credential(&self) -> Option<String> {
        self.token.read().clone()
    }
}
