//! Secure workstation config storage using the OS credential store.
//!
//! On Windows this uses DPAPI (via the `keyring` crate), on macOS Keychain,
//! and on Linux the Secret Service API. Holds the pairing between this
//! workbench workstation and the admin dashboard.

use keyring::Entry;
use serde_json::Value;
use tracing::{info, warn};

const SERVICE_NAME: &str = "the-small-workbench";

// Credential keys
pub(crate) const KEY_ADMIN_URL: &str = "admin_dashboard_url";
pub(crate) const KEY_WORKSTATION_ID: &str = "workstation_id";
pub(crate) const KEY_API_KEY: &str = "workbench_api_key";
pub(crate) const KEY_ORG_ID: &str = "organization_id";

/// All credential keys managed by this module.
const ALL_KEYS: &[&str] = &[KEY_ADMIN_URL, KEY_WORKSTATION_ID, KEY_API_KEY, KEY_ORG_ID];

// ---------------------------------------------------------------------------
// Low-level helpers
// ---------------------------------------------------------------------------

/// Retrieve a single credential from the OS keyring. Returns `None` when the
/// entry does not exist (or the platform returns a "not found" error).
pub fn get_credential(key: &str) -> Option<String> {
    let entry = match Entry::new(SERVICE_NAME, key) {
        Ok(e) => e,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to create entry");
            return None;
        }
    };
    match entry.get_password() {
        Ok(pw) => Some(pw),
        Err(keyring::Error::NoEntry) => None,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to read credential");
            None
        }
    }
}

/// Store a credential in the OS keyring.
pub fn set_credential(key: &str, value: &str) -> Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
    entry.set_password(value).map_err(|e| e.to_string())?;
    Ok(())
}

/// Delete a credential from the OS keyring. Silently succeeds if the entry
/// does not exist.
pub fn delete_credential(key: &str) -> Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
    match entry.delete_credential() {
        Ok(()) => Ok(()),
        Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

pub fn has_credential(key: &str) -> bool {
    get_credential(key).is_some()
}

// ---------------------------------------------------------------------------
// High-level API
// ---------------------------------------------------------------------------

/// The workstation is considered paired when admin URL, workstation ID, and
/// API key are all present in the credential store.
pub fn is_configured() -> bool {
    has_credential(KEY_ADMIN_URL)
        && has_credential(KEY_WORKSTATION_ID)
        && has_credential(KEY_API_KEY)
}

/// Return all stored workstation config as a JSON value in the shape the
/// frontend settings screen expects. The API key itself is never returned,
/// only whether one is present.
pub fn get_full_config() -> Value {
    serde_json::json!({
        "workstation_id":  get_credential(KEY_WORKSTATION_ID),
        "organization_id": get_credential(KEY_ORG_ID),
        "admin_url":       get_credential(KEY_ADMIN_URL),
        "has_api_key":     has_credential(KEY_API_KEY),
    })
}

/// Store pairing credentials received from the admin dashboard.
///
/// Expected JSON shape (camelCase, matching the settings screen payload):
/// ```json
/// {
///   "workstationId": "...",
///   "apiKey": "...",
///   "adminUrl": "...",      // optional
///   "organizationId": "..." // optional
/// }
/// ```
pub fn update_pairing(payload: &Value) -> Result<Value, String> {
    let api_key = payload
        .get("apiKey")
        .or_else(|| payload.get("workbench_api_key"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or("Missing required field: apiKey")?;
    let workstation_id = payload
        .get("workstationId")
        .or_else(|| payload.get("workstation_id"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or("Missing required field: workstationId")?;

    set_credential(KEY_WORKSTATION_ID, workstation_id)?;
    set_credential(KEY_API_KEY, api_key)?;

    if let Some(url) = payload
        .get("adminUrl")
        .or_else(|| payload.get("adminDashboardUrl"))
        .or_else(|| payload.get("admin_dashboard_url"))
        .and_then(Value::as_str)
    {
        let normalized = crate::api::normalize_admin_url(url);
        if !normalized.trim().is_empty() {
            set_credential(KEY_ADMIN_URL, normalized.trim())?;
        }
    }
    if let Some(oid) = payload
        .get("organizationId")
        .or_else(|| payload.get("organization_id"))
        .and_then(Value::as_str)
    {
        set_credential(KEY_ORG_ID, oid)?;
    }

    info!(workstation_id = %workstation_id, "workstation pairing updated");
    Ok(serde_json::json!({ "success": true }))
}

/// Delete every stored credential (unpair / factory reset).
pub fn factory_reset() -> Result<Value, String> {
    info!("performing factory reset – deleting all credentials");
    for key in ALL_KEYS {
        delete_credential(key)?;
    }
    Ok(serde_json::json!({ "success": true }))
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_update_pairing_requires_api_key() {
        let err = update_pairing(&serde_json::json!({ "workstationId": "ws-1" })).unwrap_err();
        assert!(err.contains("apiKey"));
    }

    #[test]
    fn test_update_pairing_requires_workstation_id() {
        let err = update_pairing(&serde_json::json!({ "apiKey": "k" })).unwrap_err();
        assert!(err.contains("workstationId"));
    }

    #[test]
    #[serial]
    #[ignore = "touches the OS keyring; run locally with --ignored"]
    fn test_pairing_roundtrip() {
        let payload = serde_json::json!({
            "workstationId": "ws-test",
            "apiKey": "key-test",
            "adminUrl": "admin.thesmall.app/",
        });
        update_pairing(&payload).unwrap();
        assert!(is_configured());
        assert_eq!(
            get_credential(KEY_ADMIN_URL).as_deref(),
            Some("https://admin.thesmall.app")
        );
        factory_reset().unwrap();
        assert!(!is_configured());
    }
}
