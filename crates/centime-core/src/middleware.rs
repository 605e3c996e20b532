// Response middleware.
//
// Every dispatch outcome flows through here: success responses persist their
// `storeData` instructions before resolving the caller, expired-token
// responses run the reauthentication state machine, and transport failures
// flip the session offline and requeue.

use centime_api::{ApiError, ApiResponse, authenticate};
use centime_store::{StoreUpdate, keys};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::manager::NetworkManager;
use crate::queue::QueuedRequest;

pub(crate) async fn handle_response(
    manager: &NetworkManager,
    request: QueuedRequest,
    outcome: Result<ApiResponse, ApiError>,
) {
    match outcome {
        Ok(response) if response.is_not_authenticated() => {
            handle_expired_token(manager, request, response).await;
        }
        Ok(response) => {
            apply_store_data(manager, &request.command, &response).await;
            request.resolve(Ok(response));
        }
        Err(err) if err.is_abort() => {
            // Deliberate cancellation; never retried.
            request.resolve(Err(err.into()));
        }
        Err(err) if err.is_transient() && !request.options.do_not_retry => {
            debug!(command = %request.command, %err, "transport failure, queueing for retry");
            manager.set_offline(true).await;
            manager.requeue(request);
        }
        Err(err) => {
            request.resolve(Err(err.into()));
        }
    }
}

/// Persist any update instructions carried in a success response, before
/// the caller's future resolves.
async fn apply_store_data(manager: &NetworkManager, command: &str, response: &ApiResponse) {
    let Some(raw) = response.store_data.clone() else {
        return;
    };
    let updates: Vec<StoreUpdate> = match serde_json::from_value(raw) {
        Ok(updates) => updates,
        Err(err) => {
            warn!(command, %err, "malformed storeData in response, skipping");
            return;
        }
    };
    if let Err(err) = manager.store().update(updates).await {
        warn!(command, %err, "unable to persist response data");
    }
}

/// The expired-token state machine. At most one reauthentication is ever in
/// flight; every other request lands back in the queue and replays once the
/// refreshed token is in place.
async fn handle_expired_token(
    manager: &NetworkManager,
    request: QueuedRequest,
    response: ApiResponse,
) {
    let session = manager.session();

    // The caller asked to see auth failures raw; never replay, even when a
    // refresh landed while this request was in flight.
    if request.options.do_not_retry {
        request.resolve(Ok(response));
        return;
    }

    // A refresh that finished between dispatch and now already replaced the
    // token; just replay.
    if request.token_snapshot.is_some() && session.auth_token() != request.token_snapshot {
        manager.requeue_front(request);
        return;
    }

    let Some(credentials) = session.credentials() else {
        if request.from_queue {
            // A queued replay with no credentials can never succeed.
            request.resolve(Err(CoreError::MissingCredentials));
        } else {
            // Foreground request: wait for the sign-in flow to store
            // credentials, then replay.
            manager.requeue(request);
        }
        return;
    };

    if !session.begin_reauthentication() {
        // Someone else is refreshing; replay once they finish.
        manager.requeue(request);
        return;
    }

    info!(command = %request.command, "auth token expired, reauthenticating");
    match authenticate(manager.http(), &credentials).await {
        Ok(tokens) => {
            session.set_auth_token(Some(tokens.auth_token.clone()));
            if let Err(err) = manager
                .store()
                .merge(
                    keys::SESSION,
                    json!({
                        "authToken": tokens.auth_token,
                        "encryptedAuthToken": tokens.encrypted_auth_token,
                    }),
                )
                .await
            {
                warn!(%err, "unable to persist refreshed session");
            }
            session.end_reauthentication();
            // The triggering request goes to the front so it replays before
            // anything that queued up behind the refresh.
            manager.requeue_front(request);
        }
        Err(err) if err.is_transient() => {
            session.end_reauthentication();
            manager.set_offline(true).await;
            manager.requeue(request);
        }
        Err(err) => {
            session.end_reauthentication();
            warn!(%err, "reauthentication declined");
            manager
                .redirect()
                .redirect_to_sign_in("reauthentication failed");
            request.resolve(Err(CoreError::UnableToReauthenticate {
                message: err.to_string(),
            }));
        }
    }
}
