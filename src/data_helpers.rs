use reqwest::Url;

use crate::error::WorkbenchError;
use crate::{db, storage, ALLOWED_EXTERNAL_HOSTS, ALLOWED_EXTERNAL_HOST_SUFFIXES, EXTERNAL_URL_MAX_LEN};

pub(crate) fn read_local_json(db: &db::DbState, key: &str) -> Result<serde_json::Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    if let Some(raw) = db::get_setting(&conn, "local", key) {
        if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&raw) {
            return Ok(parsed);
        }
    }
    Ok(serde_json::Value::Null)
}

pub(crate) fn read_local_json_array(
    db: &db::DbState,
    key: &str,
) -> Result<Vec<serde_json::Value>, String> {
    let parsed = read_local_json(db, key)?;
    Ok(parsed.as_array().cloned().unwrap_or_default())
}

pub(crate) fn write_local_json(
    db: &db::DbState,
    key: &str,
    value: &serde_json::Value,
) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    db::set_setting(&conn, "local", key, &value.to_string())
}

/// Validate a URL before handing it to the OS browser (invoice PDFs, order
/// documents). Only http(s), no credentials, and the host must be the paired
/// admin dashboard, a built-in allowlisted host, or a host configured under
/// the `security.allowed_external_hosts` setting.
pub(crate) fn validate_external_url(
    url_raw: &str,
    db: Option<&db::DbState>,
) -> Result<Url, WorkbenchError> {
    let trimmed = url_raw.trim();
    if trimmed.is_empty() {
        return Err(WorkbenchError::Validation("External URL cannot be empty".into()));
    }
    if trimmed.len() > EXTERNAL_URL_MAX_LEN {
        return Err(WorkbenchError::Validation("External URL is too long".into()));
    }

    let parsed = Url::parse(trimmed)
        .map_err(|e| WorkbenchError::Validation(format!("Invalid external URL: {e}")))?;
    let scheme = parsed.scheme().to_ascii_lowercase();
    if scheme != "https" && scheme != "http" {
        return Err(WorkbenchError::Validation(
            "Only http/https URLs are allowed".into(),
        ));
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(WorkbenchError::Validation(
            "Credentialed URLs are not allowed".into(),
        ));
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| WorkbenchError::Validation("External URL is missing a host".into()))?
        .to_ascii_lowercase();
    let localhost_http = scheme == "http" && matches!(host.as_str(), "localhost" | "127.0.0.1");

    if !localhost_http && !host_is_allowed(&host, db) {
        return Err(WorkbenchError::Validation(format!(
            "External host is not allowlisted: {host}"
        )));
    }

    Ok(parsed)
}

fn host_is_allowed(host: &str, db: Option<&db::DbState>) -> bool {
    // Documents served by the paired admin dashboard are always openable.
    if let Some(admin_host) = storage::get_credential(storage::KEY_ADMIN_URL)
        .and_then(|u| Url::parse(&crate::api::normalize_admin_url(&u)).ok())
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
    {
        if host == admin_host {
            return true;
        }
    }

    let mut custom_hosts: Vec<String> = Vec::new();
    if let Some(db_state) = db {
        if let Ok(conn) = db_state.conn.lock() {
            let raw = db::get_setting(&conn, "security", "allowed_external_hosts")
                .unwrap_or_default();
            if let Ok(arr) = serde_json::from_str::<Vec<String>>(&raw) {
                custom_hosts = arr
                    .into_iter()
                    .map(|s| s.trim().to_ascii_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect();
            } else if !raw.trim().is_empty() {
                custom_hosts = raw
                    .split(',')
                    .map(|s| s.trim().to_ascii_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
        }
    }

    let exact = ALLOWED_EXTERNAL_HOSTS.iter().any(|h| host == *h)
        || custom_hosts.iter().any(|h| host == h);
    let suffix = ALLOWED_EXTERNAL_HOST_SUFFIXES
        .iter()
        .any(|s| host.ends_with(s))
        || custom_hosts
            .iter()
            .any(|base| host.ends_with(&format!(".{base}")));
    exact || suffix
}

// ===========================================================================
// Tests
// ===========================================================================
