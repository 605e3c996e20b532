// The network controller.
//
// Owns the HTTP client, the session, and the request queue; callers hand it
// a command and get back a future that resolves once the command has either
// completed or failed terminally. Requests that cannot go out right now
// (offline, token refresh in flight) wait in the queue for the drain ticker.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use centime_api::{
    ApiResponse, Credentials, HttpClient, Method, Parameters, TransportConfig,
};
use centime_store::{Connection, Mapping, Store, keys};
use serde_json::{Value, json};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::CoreError;
use crate::middleware;
use crate::queue::{QueuedRequest, RequestOptions, RequestQueue};
use crate::redirect::SignInRedirect;
use crate::session::NetworkSession;

/// Command used as the reachability probe while offline. Requires no auth
/// and carries no parameters.
const PROBE_COMMAND: &str = "Ping";

/// Configuration for [`NetworkManager`].
pub struct NetworkConfig {
    pub transport: TransportConfig,
    /// How often the background ticker checks the queue.
    pub drain_interval: Duration,
}

impl NetworkConfig {
    pub fn new(transport: TransportConfig) -> Self {
        Self {
            transport,
            drain_interval: Duration::from_secs(1),
        }
    }

    #[must_use]
    pub fn with_drain_interval(mut self, interval: Duration) -> Self {
        self.drain_interval = interval;
        self
    }
}

struct ManagerInner {
    http: HttpClient,
    store: Store,
    session: NetworkSession,
    queue: RequestQueue,
    redirect: Arc<dyn SignInRedirect>,
    /// Wakes the ticker early when queued work becomes runnable.
    wake: Notify,
    shutdown: CancellationToken,
    store_connections: Mutex<Vec<Connection>>,
    drain_interval: Duration,
}

/// Dispatches API commands, queueing and replaying them around offline
/// periods and token refreshes.
///
/// Cheap to clone (`Arc` inside). Call [`start`](NetworkManager::start) once
/// to hydrate the session from the store and launch the drain ticker, and
/// [`shut_down`](NetworkManager::shut_down) on sign-out.
#[derive(Clone)]
pub struct NetworkManager {
    inner: Arc<ManagerInner>,
}

impl NetworkManager {
    pub fn new(
        config: NetworkConfig,
        store: Store,
        redirect: Arc<dyn SignInRedirect>,
    ) -> Result<Self, CoreError> {
        Ok(Self {
            inner: Arc::new(ManagerInner {
                http: HttpClient::new(&config.transport)?,
                store,
                session: NetworkSession::new(),
                queue: RequestQueue::default(),
                redirect,
                wake: Notify::new(),
                shutdown: CancellationToken::new(),
                store_connections: Mutex::new(Vec::new()),
                drain_interval: config.drain_interval,
            }),
        })
    }

    /// Hydrate the session from persisted state, subscribe to the session
    /// and credentials keys, and launch the drain ticker.
    pub async fn start(&self) {
        if let Some(value) = self.inner.store.get(keys::SESSION).await {
            self.session().set_auth_token(token_from_session(&value));
        }
        if let Some(value) = self.inner.store.get(keys::CREDENTIALS).await {
            self.session().set_credentials(credentials_from_value(&value));
        }

        // Sign-in flows write these keys through the store; mirror them into
        // the session so dispatch always sees the current token.
        let session_conn = {
            let manager = self.clone();
            self.inner
                .store
                .connect(
                    Mapping::per_key(keys::SESSION, move |_, value| {
                        manager
                            .session()
                            .set_auth_token(value.and_then(token_from_session));
                    })
                    .without_initial_values(),
                )
                .await
        };
        let credentials_conn = {
            let manager = self.clone();
            self.inner
                .store
                .connect(
                    Mapping::per_key(keys::CREDENTIALS, move |_, value| {
                        manager
                            .session()
                            .set_credentials(value.and_then(credentials_from_value));
                    })
                    .without_initial_values(),
                )
                .await
        };
        {
            let mut connections = self
                .inner
                .store_connections
                .lock()
                .expect("store connections lock poisoned");
            connections.push(session_conn);
            connections.push(credentials_conn);
        }

        let manager = self.clone();
        tokio::spawn(async move { manager.run_ticker().await });
        info!("network manager started");
    }

    /// Issue `command` with the default options.
    pub async fn request(
        &self,
        command: &str,
        parameters: Parameters,
    ) -> Result<ApiResponse, CoreError> {
        self.request_with_options(command, parameters, RequestOptions::default())
            .await
    }

    /// Issue `command`, queueing it if the network is offline or a token
    /// refresh is in flight.
    pub async fn request_with_options(
        &self,
        command: &str,
        parameters: Parameters,
        options: RequestOptions,
    ) -> Result<ApiResponse, CoreError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(CoreError::ShutDown);
        }

        let (request, rx) = QueuedRequest::new(command.to_owned(), parameters, options);

        if self.session().is_reauthenticating() || self.session().is_offline() {
            trace!(command, "deferring request to queue");
            self.inner.queue.push_back(request);
        } else if options.requires_auth && self.session().auth_token().is_none() {
            // Fail fast so an unauthenticated client cannot generate a
            // stampede of doomed traffic.
            self.inner.redirect.redirect_to_sign_in("no auth token");
            request.resolve(Err(CoreError::NotSignedIn));
        } else {
            self.dispatch(request).await;
        }

        rx.await.map_err(|_| CoreError::ShutDown)?
    }

    /// Send one request and hand the outcome to the response middleware.
    pub(crate) async fn dispatch(&self, mut request: QueuedRequest) {
        let mut parameters = request.parameters.clone();
        if request.options.requires_auth {
            let token = self.session().auth_token();
            if let Some(token) = &token {
                parameters.insert("authToken".into(), Value::String(token.clone()));
            }
            request.token_snapshot = token;
        }
        parameters.insert(
            "shouldRetry".into(),
            Value::Bool(!request.options.do_not_retry),
        );

        let outcome = self
            .inner
            .http
            .request_with_options(
                &request.command,
                &parameters,
                Method::Post,
                request.options.can_cancel,
            )
            .await;

        middleware::handle_response(self, request, outcome).await;
    }

    /// Abort every cancellable in-flight request (e.g. on navigation away
    /// from a search). Queued requests are unaffected.
    pub fn cancel_pending_requests(&self) {
        self.inner.http.cancel_pending_requests();
    }

    /// Tear down: stop the ticker, abort in-flight requests, reject
    /// everything still queued, and drop the store subscriptions.
    pub fn shut_down(&self) {
        self.inner.shutdown.cancel();
        self.inner.http.cancel_pending_requests();
        for request in self.inner.queue.drain() {
            request.resolve(Err(CoreError::ShutDown));
        }
        let connections = {
            let mut guard = self
                .inner
                .store_connections
                .lock()
                .expect("store connections lock poisoned");
            std::mem::take(&mut *guard)
        };
        for connection in connections {
            connection.disconnect();
        }
        info!("network manager shut down");
    }

    pub fn session(&self) -> &NetworkSession {
        &self.inner.session
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    pub(crate) fn redirect(&self) -> &dyn SignInRedirect {
        self.inner.redirect.as_ref()
    }

    pub(crate) fn http(&self) -> &HttpClient {
        &self.inner.http
    }

    /// Put `request` at the back of the queue and nudge the ticker.
    pub(crate) fn requeue(&self, request: QueuedRequest) {
        self.inner.queue.push_back(request);
        self.inner.wake.notify_one();
    }

    /// Put `request` at the front of the queue so it replays ahead of
    /// anything queued behind it, and nudge the ticker.
    pub(crate) fn requeue_front(&self, request: QueuedRequest) {
        self.inner.queue.push_front(request);
        self.inner.wake.notify_one();
    }

    /// Flip the offline flag, persist it for the UI, and wake the ticker
    /// when coming back online.
    pub(crate) async fn set_offline(&self, offline: bool) {
        if self.session().is_offline() == offline {
            return;
        }
        self.session().set_offline(offline);
        debug!(offline, "connectivity changed");
        if let Err(err) = self
            .inner
            .store
            .merge(keys::NETWORK, json!({ "isOffline": offline }))
            .await
        {
            warn!(%err, "unable to persist connectivity state");
        }
        if !offline {
            self.inner.wake.notify_one();
        }
    }

    async fn run_ticker(&self) {
        let mut interval = tokio::time::interval(self.inner.drain_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = self.inner.shutdown.cancelled() => return,
                _ = interval.tick() => {}
                () = self.inner.wake.notified() => {}
            }
            self.tick().await;
        }
    }

    /// One drain pass: while reauthenticating the queue stays paused; while
    /// offline only the reachability probe goes out.
    async fn tick(&self) {
        if self.session().is_reauthenticating() {
            return;
        }

        if self.session().is_offline() {
            match self
                .inner
                .http
                .request_with_options(PROBE_COMMAND, &Parameters::new(), Method::Post, true)
                .await
            {
                // Any parsed response, even a soft failure, proves the API
                // is reachable again.
                Ok(_) => {}
                Err(err) if !err.is_transient() => {}
                Err(_) => return,
            }
            self.set_offline(false).await;
        }

        if self.inner.queue.is_empty() {
            return;
        }
        let batch = self.inner.queue.drain();
        debug!(count = batch.len(), "draining request queue");
        let has_credentials = self.session().credentials().is_some();
        for mut request in batch {
            // An authenticated request cannot make progress until the
            // sign-in flow has stored credentials; keep it waiting rather
            // than burning a doomed replay.
            if request.options.requires_auth && !has_credentials {
                self.inner.queue.push_back(request);
                continue;
            }
            request.from_queue = true;
            let manager = self.clone();
            tokio::spawn(async move { manager.dispatch(request).await });
        }
    }
}

fn token_from_session(value: &Value) -> Option<String> {
    value.get("authToken")?.as_str().map(str::to_owned)
}

fn credentials_from_value(value: &Value) -> Option<Credentials> {
    let login = value.get("login")?.as_str()?;
    let password = value.get("password")?.as_str()?;
    Some(Credentials::new(login, password))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_value_parsing() {
        assert_eq!(
            token_from_session(&json!({ "authToken": "abc" })),
            Some("abc".into())
        );
        assert_eq!(token_from_session(&json!({})), None);
        assert_eq!(token_from_session(&json!(null)), None);

        let credentials =
            credentials_from_value(&json!({ "login": "a@x.com", "password": "s" }));
        assert_eq!(credentials.map(|c| c.login), Some("a@x.com".into()));
        assert!(credentials_from_value(&json!({ "login": "a@x.com" })).is_none());
    }
}
