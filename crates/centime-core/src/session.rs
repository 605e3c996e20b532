// Auth session state.
//
// One context object instead of module globals: token, credentials, and the
// guards the queue and middleware coordinate through. Only the network layer
// mutates this; UI code goes through the persisted store.

use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use centime_api::Credentials;

/// The current auth session and network availability flags.
///
/// `reauthenticating` is the single-flight guard: at most one token refresh
/// is ever in flight, enforced by [`begin_reauthentication`]'s
/// compare-and-swap rather than by locking.
///
/// [`begin_reauthentication`]: NetworkSession::begin_reauthentication
#[derive(Default)]
pub struct NetworkSession {
    auth_token: RwLock<Option<String>>,
    credentials: RwLock<Option<Credentials>>,
    reauthenticating: AtomicBool,
    offline: AtomicBool,
}

impl NetworkSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn auth_token(&self) -> Option<String> {
        self.auth_token
            .read()
            .expect("auth token lock poisoned")
            .clone()
    }

    pub fn set_auth_token(&self, token: Option<String>) {
        *self.auth_token.write().expect("auth token lock poisoned") = token;
    }

    pub fn credentials(&self) -> Option<Credentials> {
        self.credentials
            .read()
            .expect("credentials lock poisoned")
            .clone()
    }

    pub fn set_credentials(&self, credentials: Option<Credentials>) {
        *self
            .credentials
            .write()
            .expect("credentials lock poisoned") = credentials;
    }

    pub fn is_reauthenticating(&self) -> bool {
        self.reauthenticating.load(Ordering::Acquire)
    }

    /// Claim the reauthentication slot. Returns `false` if another refresh
    /// is already in flight.
    pub fn begin_reauthentication(&self) -> bool {
        self.reauthenticating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn end_reauthentication(&self) {
        self.reauthenticating.store(false, Ordering::Release);
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::Acquire)
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reauthentication_slot_admits_one_claimant() {
        let session = NetworkSession::new();
        assert!(session.begin_reauthentication());
        assert!(!session.begin_reauthentication());
        assert!(session.is_reauthenticating());

        session.end_reauthentication();
        assert!(session.begin_reauthentication());
    }

    #[test]
    fn token_round_trips() {
        let session = NetworkSession::new();
        assert_eq!(session.auth_token(), None);
        session.set_auth_token(Some("tok".into()));
        assert_eq!(session.auth_token(), Some("tok".into()));
        session.set_auth_token(None);
        assert_eq!(session.auth_token(), None);
    }
}
