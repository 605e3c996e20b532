//! Well-known storage keys shared between the core and the UI layer.
//!
//! Singular keys match exactly; `COLLECTION_*` keys are prefixes — every key
//! that starts with the prefix belongs to the collection (one entry per
//! report, transaction, ...).

/// The signed-in session: auth token, account identifiers.
pub const SESSION: &str = "session";

/// Auto-generated partner credentials used for silent reauthentication.
pub const CREDENTIALS: &str = "credentials";

/// Network state mirrored for the UI (offline flag).
pub const NETWORK: &str = "network";

/// Per-user preferences.
pub const ACCOUNT: &str = "account";

/// Chat report collection: `report_{reportID}`.
pub const COLLECTION_REPORT: &str = "report_";

/// Report action collection: `reportActions_{reportID}`.
pub const COLLECTION_REPORT_ACTIONS: &str = "reportActions_";

/// Wallet transaction collection: `transaction_{transactionID}`.
pub const COLLECTION_TRANSACTION: &str = "transaction_";

/// Reserved key holding the store's own recently-accessed list so the
/// eviction order survives process restarts. Never evicted.
pub const RECENTLY_ACCESSED: &str = "recentlyAccessedKeys";

/// The collection prefixes the client registers by default.
pub fn default_collections() -> Vec<String> {
    vec![
        COLLECTION_REPORT.to_owned(),
        COLLECTION_REPORT_ACTIONS.to_owned(),
        COLLECTION_TRANSACTION.to_owned(),
    ]
}
