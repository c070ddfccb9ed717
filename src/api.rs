//! Admin dashboard API client.
//!
//! Authenticated HTTP access to the order-management platform: recent orders,
//! order line items (with and without barcode images), barcode persistence,
//! and the hosted barcode-render endpoint. The client implements
//! [`rows::OrderDataSource`] so the row store and workflow never see HTTP.

use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::WorkbenchError;
use crate::rows::{BarcodeRecord, BarcodeUpdate, LineItemRecord, OrderDataSource, OrderOption};
use crate::storage;

/// Default timeout for API requests (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout used specifically for the lightweight connectivity test.
const CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the admin dashboard URL:
/// - strip trailing slashes and a trailing `/api` segment
/// - ensure a scheme is present (https, or http for localhost)
pub fn normalize_admin_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }
    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }
    while url.ends_with('/') {
        url.pop();
    }

    url
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into an operator-friendly message.
fn friendly_error(url: &str, err: &reqwest::Error) -> String {
    if err.is_connect() {
        return format!("Cannot reach admin dashboard at {url}");
    }
    if err.is_timeout() {
        return format!("Connection to {url} timed out");
    }
    if err.is_builder() {
        return format!("Invalid admin dashboard URL: {url}");
    }
    format!("Network error communicating with {url}: {err}")
}

/// Convert an HTTP status code into an operator-friendly message.
fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "API key is invalid or expired".to_string(),
        403 => "Workstation not authorized".to_string(),
        404 => "Admin dashboard endpoint not found".to_string(),
        s if s >= 500 => format!("Admin dashboard server error (HTTP {s})"),
        s => format!("Unexpected response from admin dashboard (HTTP {s})"),
    }
}

/// Extract the most useful message out of an error response body.
fn response_error_detail(status: StatusCode, body_text: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body_text) {
        let message = json
            .get("error")
            .or_else(|| json.get("message"))
            .and_then(Value::as_str)
            .map(|s| s.to_string())
            .unwrap_or_else(|| status_error(status));
        if let Some(details) = json.get("details").or_else(|| json.get("errors")) {
            return format!("{message} (HTTP {}): {details}", status.as_u16());
        }
        return format!("{message} (HTTP {})", status.as_u16());
    }
    if !body_text.trim().is_empty() {
        format!(
            "{} (HTTP {}): {}",
            status_error(status),
            status.as_u16(),
            body_text.trim()
        )
    } else {
        format!("{} (HTTP {})", status_error(status), status.as_u16())
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Authenticated client for the admin dashboard workbench endpoints.
pub struct AdminClient {
    base_url: String,
    api_key: String,
    workstation_id: String,
    http: Client,
}

impl AdminClient {
    /// Build a client from the paired credentials in the OS keyring. Fails
    /// with `Validation` when the workstation has not been paired yet.
    pub fn from_storage() -> Result<Self, WorkbenchError> {
        let base_url = storage::get_credential(storage::KEY_ADMIN_URL)
            .map(|u| normalize_admin_url(&u))
            .filter(|u| !u.is_empty());
        let api_key =
            storage::get_credential(storage::KEY_API_KEY).filter(|k| !k.trim().is_empty());
        let workstation_id =
            storage::get_credential(storage::KEY_WORKSTATION_ID).filter(|w| !w.trim().is_empty());

        match (base_url, api_key, workstation_id) {
            (Some(base_url), Some(api_key), Some(workstation_id)) => {
                Self::new(base_url, api_key, workstation_id)
            }
            _ => Err(WorkbenchError::Validation(
                "Workstation is not paired with the admin dashboard".into(),
            )),
        }
    }

    pub fn new(
        base_url: String,
        api_key: String,
        workstation_id: String,
    ) -> Result<Self, WorkbenchError> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| WorkbenchError::Internal(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            base_url: normalize_admin_url(&base_url),
            api_key: api_key.trim().to_string(),
            workstation_id: workstation_id.trim().to_string(),
            http,
        })
    }

    /// Perform an authenticated request. `path` includes the leading slash,
    /// e.g. `/api/workbench/orders/recent`.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, String> {
        let full_url = format!("{}{path}", self.base_url);
        let mut req = self
            .http
            .request(method, &full_url)
            .header("X-Workbench-API-Key", &self.api_key)
            .header("x-workstation-id", &self.workstation_id)
            .header("Content-Type", "application/json");
        if let Some(b) = body {
            req = req.json(b);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e))?;
        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(response_error_detail(status, &body_text));
        }
        if body_text.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body_text)
            .map_err(|e| format!("Invalid JSON from admin dashboard: {e}"))
    }

    /// Fetch the renderer profile — the one-time handshake the renderer
    /// loader performs before the first render of a session.
    pub async fn renderer_profile(&self) -> Result<Value, WorkbenchError> {
        self.request(Method::GET, "/api/workbench/barcode/renderer", None)
            .await
            .map_err(WorkbenchError::DependencyLoad)
    }

    /// Render a content string into a barcode image on the platform side.
    /// Returns the raw response; the renderer module extracts the image.
    pub async fn render_barcode(&self, payload: &Value) -> Result<Value, WorkbenchError> {
        self.request(Method::POST, "/api/workbench/barcode/render", Some(payload))
            .await
            .map_err(WorkbenchError::Render)
    }
}

/// Pull an array out of the common response envelopes: a bare array, or an
/// object wrapping it under one of the given keys.
fn array_field(resp: Value, keys: &[&str]) -> Vec<Value> {
    match resp {
        Value::Array(items) => items,
        Value::Object(map) => {
            for key in keys {
                if let Some(Value::Array(items)) = map.get(*key) {
                    return items.clone();
                }
            }
            Vec::new()
        }
        _ => Vec::new(),
    }
}

#[async_trait::async_trait]
impl OrderDataSource for AdminClient {
    async fn recent_orders(&self) -> Result<Vec<OrderOption>, WorkbenchError> {
        let resp = self
            .request(Method::GET, "/api/workbench/orders/recent", None)
            .await
            .map_err(WorkbenchError::Fetch)?;
        let items = array_field(resp, &["orders", "data"]);
        let options = items
            .into_iter()
            .filter_map(|v| serde_json::from_value::<OrderOption>(v).ok())
            .collect::<Vec<_>>();
        debug!(count = options.len(), "recent orders fetched");
        Ok(options)
    }

    async fn order_line_items(
        &self,
        order_id: &str,
    ) -> Result<Vec<LineItemRecord>, WorkbenchError> {
        let path = format!("/api/workbench/orders/{order_id}/line-items");
        let resp = self
            .request(Method::GET, &path, None)
            .await
            .map_err(WorkbenchError::Fetch)?;
        let items = array_field(resp, &["lineItems", "items", "data"]);
        items
            .into_iter()
            .map(|v| {
                serde_json::from_value::<LineItemRecord>(v)
                    .map_err(|e| WorkbenchError::Fetch(format!("Malformed line item: {e}")))
            })
            .collect()
    }

    async fn line_items_with_barcodes(
        &self,
        order_id: &str,
    ) -> Result<Vec<BarcodeRecord>, WorkbenchError> {
        let path = format!("/api/workbench/orders/{order_id}/line-items/barcodes");
        let resp = self
            .request(Method::GET, &path, None)
            .await
            .map_err(WorkbenchError::Fetch)?;
        let items = array_field(resp, &["lineItems", "items", "data"]);
        items
            .into_iter()
            .map(|v| {
                serde_json::from_value::<BarcodeRecord>(v)
                    .map_err(|e| WorkbenchError::Fetch(format!("Malformed barcode record: {e}")))
            })
            .collect()
    }

    async fn persist_barcode(&self, update: &BarcodeUpdate) -> Result<(), WorkbenchError> {
        let path = format!("/api/workbench/line-items/{}/barcode", update.row_id);
        let body = serde_json::json!({
            "barcodeImage": update.barcode_image,
            "location": update.location,
        });
        self.request(Method::PUT, &path, Some(&body))
            .await
            .map_err(WorkbenchError::Persist)?;
        info!(row_id = %update.row_id, "barcode persisted");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Connectivity test
// ---------------------------------------------------------------------------

/// Result of a connectivity test.
#[derive(serde::Serialize)]
pub struct ConnectivityResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Test connectivity to the admin dashboard with a lightweight health-check.
pub async fn test_connectivity(admin_url: &str, api_key: &str) -> ConnectivityResult {
    let url = normalize_admin_url(admin_url);
    let health_url = format!("{url}/api/health");

    let client = match Client::builder().timeout(CONNECTIVITY_TIMEOUT).build() {
        Ok(c) => c,
        Err(e) => {
            return ConnectivityResult {
                success: false,
                latency_ms: None,
                error: Some(format!("Failed to create HTTP client: {e}")),
            };
        }
    };

    let start = Instant::now();
    let resp = match client
        .get(&health_url)
        .header("X-Workbench-API-Key", api_key.trim())
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => {
            return ConnectivityResult {
                success: false,
                latency_ms: None,
                error: Some(friendly_error(&url, &e)),
            };
        }
    };

    let latency = start.elapsed().as_millis() as u64;
    let status = resp.status();

    if status.is_success() {
        info!(latency_ms = latency, "connectivity test passed");
        ConnectivityResult {
            success: true,
            latency_ms: Some(latency),
            error: None,
        }
    } else {
        ConnectivityResult {
            success: false,
            latency_ms: Some(latency),
            error: Some(status_error(status)),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_admin_url() {
        assert_eq!(
            normalize_admin_url("admin.thesmall.app"),
            "https://admin.thesmall.app"
        );
        assert_eq!(
            normalize_admin_url("https://admin.thesmall.app/api/"),
            "https://admin.thesmall.app"
        );
        assert_eq!(
            normalize_admin_url("localhost:3000/"),
            "http://localhost:3000"
        );
        assert_eq!(
            normalize_admin_url("  https://x.example.com///  "),
            "https://x.example.com"
        );
    }

    #[test]
    fn test_status_error_messages() {
        assert_eq!(
            status_error(StatusCode::UNAUTHORIZED),
            "API key is invalid or expired"
        );
        assert_eq!(
            status_error(StatusCode::FORBIDDEN),
            "Workstation not authorized"
        );
        assert!(status_error(StatusCode::BAD_GATEWAY).contains("server error"));
    }

    #[test]
    fn test_response_error_detail_prefers_body_message() {
        let detail = response_error_detail(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"error":"location too long","details":{"max":80}}"#,
        );
        assert!(detail.contains("location too long"));
        assert!(detail.contains("422"));
    }

    #[test]
    fn test_array_field_handles_envelopes() {
        let bare = serde_json::json!([1, 2]);
        assert_eq!(array_field(bare, &["items"]).len(), 2);

        let wrapped = serde_json::json!({"lineItems": [1, 2, 3]});
        assert_eq!(array_field(wrapped, &["lineItems", "items"]).len(), 3);

        let neither = serde_json::json!({"count": 0});
        assert!(array_field(neither, &["items"]).is_empty());
    }

    #[test]
    fn test_order_option_accepts_value_alias() {
        let opt: OrderOption =
            serde_json::from_str(r#"{"label":"SO-100 — Acme","value":"O-1"}"#).unwrap();
        assert_eq!(opt.id, "O-1");
    }
}
