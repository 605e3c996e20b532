use tracing::warn;

/// Collaborator invoked when authentication cannot be recovered.
///
/// The application side clears session-scoped keys and routes to the
/// sign-in screen; the core only calls it.
pub trait SignInRedirect: Send + Sync {
    fn redirect_to_sign_in(&self, reason: &str);
}

/// Redirect implementation for headless hosts and tests: logs and does
/// nothing else.
#[derive(Debug, Default)]
pub struct LogOnlyRedirect;

impl SignInRedirect for LogOnlyRedirect {
    fn redirect_to_sign_in(&self, reason: &str) {
        warn!(reason, "redirecting to sign-in");
    }
}
