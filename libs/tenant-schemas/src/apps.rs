//! Application identifiers and shared/tenant classification.
//!
//! An application is named by an opaque identifier, usually a dotted module
//! path such as `apps.billing`. The last segment is the application *label*,
//! which is what the managed-app signal and the migration history are keyed by.

/// Returns the label of an application identifier (its last dotted segment).
///
/// ```
/// use tenant_schemas::apps::app_label;
///
/// assert_eq!(app_label("apps.billing"), "billing");
/// assert_eq!(app_label("orders"), "orders");
/// ```
#[must_use]
pub fn app_label(app: &str) -> &str {
    app.rsplit('.').next().unwrap_or(app)
}

/// Partition of the tenant-apps list into overridden and tenant-only apps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppClassification {
    /// Apps present in both the shared and the tenant lists.
    pub overridden: Vec<String>,
    /// Apps present only in the tenant list.
    pub tenant_only: Vec<String>,
}

/// Classify `tenant_apps` against `shared_apps`.
///
/// Both outputs preserve the order of `tenant_apps`. Malformed inputs are not
/// rejected: an empty tenant list yields two empty sets.
#[must_use]
pub fn classify(shared_apps: &[String], tenant_apps: &[String]) -> AppClassification {
    let tenant_only: Vec<String> = tenant_apps
        .iter()
        .filter(|app| !shared_apps.contains(app))
        .cloned()
        .collect();
    let overridden = tenant_apps
        .iter()
        .filter(|app| !tenant_only.contains(app))
        .cloned()
        .collect();

    AppClassification {
        overridden,
        tenant_only,
    }
}
