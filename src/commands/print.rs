//! Barcode sheet printing and document-opening commands.

use serde_json::Value;
use tauri::Manager;
use tracing::{info, warn};

use crate::commands::payload_string;
use crate::rows::{OrderDataSource, RowStore};
use crate::sheet::{compose_sheet, tiles_from_rows, write_sheet, SheetLayout, SheetTile};
use crate::{api, data_helpers, db, notify, notify_error};

/// Compose the selected order's barcode sheet, write it under the app data
/// dir, and open it with the OS viewer for printing.
#[tauri::command]
pub async fn barcode_sheet_print(
    store: tauri::State<'_, RowStore>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let order_id = store
        .selected_order()
        .map_err(String::from)?
        .ok_or("No order selected")?;
    let rows = store.rows().map_err(String::from)?;
    let order_number = rows
        .first()
        .map(|r| r.order_number.clone())
        .unwrap_or_else(|| order_id.clone());

    // Prefer images already in the table; fall back to the with-barcodes
    // fetch for rows that are generated but were loaded without payloads.
    let mut tiles = tiles_from_rows(&rows);
    if tiles.is_empty() && rows.iter().any(|r| r.barcode_generated) {
        let client = api::AdminClient::from_storage().map_err(|e| {
            notify_error(&app, &e);
            String::from(e)
        })?;
        match client.line_items_with_barcodes(&order_id).await {
            Ok(records) => {
                tiles = records
                    .into_iter()
                    .filter(|rec| !rec.barcode_image.is_empty())
                    .map(|rec| {
                        let caption = rows
                            .iter()
                            .find(|r| r.id == rec.id)
                            .map(|r| {
                                if r.location.is_empty() {
                                    r.product_name.clone()
                                } else {
                                    format!("{} @ {}", r.product_name, r.location)
                                }
                            })
                            .unwrap_or_else(|| rec.id.clone());
                        SheetTile {
                            caption,
                            image_data_url: rec.barcode_image,
                        }
                    })
                    .collect();
            }
            Err(err) => {
                notify_error(&app, &err);
                return Err(err.into());
            }
        }
    }

    let sheet = match compose_sheet(&tiles, &SheetLayout::default()) {
        Ok(sheet) => sheet,
        Err(err) => {
            notify_error(&app, &err);
            return Err(err.into());
        }
    };

    let app_data_dir = app
        .path()
        .app_data_dir()
        .map_err(|e| format!("Failed to resolve app data dir: {e}"))?;
    let path = write_sheet(&app_data_dir, &order_number, &sheet).map_err(|e| {
        notify_error(&app, &e);
        String::from(e)
    })?;

    let url = format!("file://{}", path.display());
    if let Err(e) = webbrowser::open(&url) {
        warn!(error = %e, "failed to open sheet in viewer");
        notify(
            &app,
            "Sheet saved",
            &format!("Sheet written to {} but could not be opened", path.display()),
            "warning",
        );
    } else {
        notify(
            &app,
            "Sheet ready",
            &format!("{} barcode(s) on the sheet", sheet.tile_count),
            "success",
        );
    }

    info!(order_id = %order_id, tiles = sheet.tile_count, "barcode sheet printed");
    Ok(serde_json::json!({
        "success": true,
        "path": path.display().to_string(),
        "tileCount": sheet.tile_count,
        "skipped": sheet.skipped,
    }))
}

/// Open an order document (e.g. the invoice PDF) in the system browser after
/// allowlist validation.
#[tauri::command]
pub async fn invoice_open(
    arg0: Option<Value>,
    arg1: Option<String>,
    db: tauri::State<'_, db::DbState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let url_raw = payload_string(arg0, arg1, &["url", "invoiceUrl", "invoice_url"])
        .ok_or("Missing url")?;

    let url = data_helpers::validate_external_url(&url_raw, Some(&db)).map_err(|e| {
        notify_error(&app, &e);
        String::from(e)
    })?;

    webbrowser::open(url.as_str()).map_err(|e| {
        let msg = format!("Failed to open document: {e}");
        notify(&app, "Open failed", &msg, "error");
        msg
    })?;

    info!(host = %url.host_str().unwrap_or_default(), "document opened");
    Ok(serde_json::json!({ "success": true }))
}
