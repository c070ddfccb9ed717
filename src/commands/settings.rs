//! Workstation pairing and settings commands.

use serde_json::Value;

use crate::{api, diagnostics, notify, storage};

/// Current workstation config (without the API key itself).
#[tauri::command]
pub async fn workstation_config_get() -> Result<Value, String> {
    Ok(storage::get_full_config())
}

/// Store pairing credentials received from the admin dashboard settings
/// screen.
#[tauri::command]
pub async fn workstation_pairing_update(
    arg0: Option<Value>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing payload")?;
    match storage::update_pairing(&payload) {
        Ok(result) => {
            notify(
                &app,
                "Paired",
                "Workstation paired with the admin dashboard",
                "success",
            );
            Ok(result)
        }
        Err(e) => {
            notify(&app, "Pairing failed", &e, "error");
            Err(e)
        }
    }
}

/// Health-check against the admin dashboard. Uses the supplied URL/key when
/// given (settings screen "test before save"), else the stored pairing.
#[tauri::command]
pub async fn workstation_connectivity_test(arg0: Option<Value>) -> Result<Value, String> {
    let admin_url = arg0
        .as_ref()
        .and_then(|v| v.get("adminUrl").or_else(|| v.get("admin_url")))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| storage::get_credential(storage::KEY_ADMIN_URL))
        .ok_or("No admin dashboard URL configured")?;
    let api_key = arg0
        .as_ref()
        .and_then(|v| v.get("apiKey").or_else(|| v.get("api_key")))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| storage::get_credential(storage::KEY_API_KEY))
        .unwrap_or_default();

    let result = api::test_connectivity(&admin_url, &api_key).await;
    serde_json::to_value(&result).map_err(|e| e.to_string())
}

/// Unpair the workstation and wipe stored credentials.
#[tauri::command]
pub async fn workstation_factory_reset(app: tauri::AppHandle) -> Result<Value, String> {
    let result = storage::factory_reset()?;
    notify(
        &app,
        "Workstation reset",
        "All pairing credentials were removed",
        "warning",
    );
    Ok(result)
}

/// Version / build / platform info for the about box.
#[tauri::command]
pub async fn about_get() -> Result<Value, String> {
    Ok(diagnostics::get_about_info())
}
