//! Signed-in identity, as provided by the console's auth/session collaborator.

use std::sync::Arc;

use arc_swap::ArcSwapOption;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Console role as stored by the auth layer, e.g. `DISPATCHER`
    pub role: String,
    pub token: Option<String>,
    pub username: Option<String>,
}

impl Identity {
    pub fn new(role: impl Into<String>, token: Option<String>) -> Self {
        Self {
            role: role.into(),
            token,
            username: None,
        }
    }
}

/// Read-only view of the current identity. Consulted on every connect and request.
pub trait IdentityProvider: Send + Sync {
    fn current(&self) -> Option<Identity>;
}

/// Identity held in memory; swapped lock-free on sign-in / sign-out.
#[derive(Default)]
pub struct SessionIdentity {
    current: ArcSwapOption<Identity>,
}

impl SessionIdentity {
    pub fn new(identity: Option<Identity>) -> Self {
        Self {
            current: ArcSwapOption::new(identity.map(Arc::new)),
        }
    }

    pub fn set(&self, identity: Option<Identity>) {
        self.current.store(identity.map(Arc::new));
    }
}

impl IdentityProvider for SessionIdentity {
    fn current(&self) -> Option<Identity> {
        self.current.load_full().map(|identity| (*identity).clone())
    }
}
