//! Barcode generation, draft editing, and draft saving commands.

use std::sync::Mutex;

use serde_json::Value;
use tauri::Emitter;
use tracing::warn;

use crate::commands::payload_string;
use crate::renderer::{RenderOptions, RenderedBarcode, RendererLoader, Symbology};
use crate::rows::RowStore;
use crate::workbench::{
    generate_batch, generate_row, save_drafts, BatchTier, GenerateOutcome, SurfaceSink,
};
use crate::{api, db, emit_rows_updated, notify, notify_error};

// ---------------------------------------------------------------------------
// Surface sinks
// ---------------------------------------------------------------------------

/// Delivers rendered images to the frontend as `barcode_rendered` events.
/// The frontend resolves `surfaceKey` to the matching DOM node.
pub(crate) struct EventSurfaceSink {
    app: tauri::AppHandle,
}

impl EventSurfaceSink {
    pub(crate) fn new(app: tauri::AppHandle) -> Self {
        Self { app }
    }
}

impl SurfaceSink for EventSurfaceSink {
    fn deliver(&self, surface_key: &str, rendered: &RenderedBarcode) {
        let _ = self.app.emit(
            "barcode_rendered",
            serde_json::json!({
                "surfaceKey": surface_key,
                "content": rendered.content,
                "image": rendered.image,
            }),
        );
    }
}

/// Event sink that additionally appends single-row generations to the local
/// audit log. The entry is written at render time (persisted = 0) and marked
/// persisted once the update call confirms, so renders that never make it to
/// the platform stay visible in diagnostics.
struct AuditingSurfaceSink<'a> {
    inner: EventSurfaceSink,
    db: &'a db::DbState,
    order_id: String,
    row_id: String,
    symbology: Symbology,
    audit_id: Mutex<Option<String>>,
}

impl SurfaceSink for AuditingSurfaceSink<'_> {
    fn deliver(&self, surface_key: &str, rendered: &RenderedBarcode) {
        self.inner.deliver(surface_key, rendered);
        if let Ok(conn) = self.db.conn.lock() {
            match db::record_generation(
                &conn,
                &self.row_id,
                &self.order_id,
                &rendered.content,
                self.symbology.as_str(),
                false,
            ) {
                Ok(id) => *self.audit_id.lock().unwrap_or_else(|e| e.into_inner()) = Some(id),
                Err(e) => warn!(error = %e, "failed to record generation audit entry"),
            }
        }
    }
}

impl AuditingSurfaceSink<'_> {
    fn mark_persisted(&self) {
        let id = self
            .audit_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let (Some(id), Ok(conn)) = (id, self.db.conn.lock()) {
            if let Err(e) = db::mark_generation_persisted(&conn, &id) {
                warn!(error = %e, "failed to mark generation persisted");
            }
        }
    }
}

fn options_for(symbology: Option<&str>) -> RenderOptions {
    match symbology.map(str::to_ascii_lowercase).as_deref() {
        Some("qr") => RenderOptions::qr(),
        _ => RenderOptions::default(),
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Buffer a warehouse-location edit for a row. Nothing is persisted until
/// `drafts_save` or a generation consumes the draft.
#[tauri::command]
pub async fn location_set_draft(
    arg0: Option<Value>,
    store: tauri::State<'_, RowStore>,
) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing payload")?;
    let row_id = payload
        .get("rowId")
        .or_else(|| payload.get("row_id"))
        .or_else(|| payload.get("id"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or("Missing rowId")?;
    let value = payload
        .get("value")
        .or_else(|| payload.get("location"))
        .and_then(Value::as_str)
        .unwrap_or_default();

    store.set_draft_location(row_id, value).map_err(String::from)?;
    let snapshot = store.snapshot().map_err(String::from)?;
    Ok(serde_json::json!({
        "success": true,
        "draftCount": snapshot.draft_count,
    }))
}

/// Persist all pending location drafts. Rows without a generated barcode are
/// rejected locally and reported by product name.
#[tauri::command]
pub async fn drafts_save(
    store: tauri::State<'_, RowStore>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let client = api::AdminClient::from_storage().map_err(|e| {
        notify_error(&app, &e);
        String::from(e)
    })?;

    let report = match save_drafts(&store, &client).await {
        Ok(report) => report,
        Err(err) => {
            notify_error(&app, &err);
            return Err(err.into());
        }
    };

    if !report.blocked.is_empty() {
        notify(
            &app,
            "Some locations not saved",
            &format!(
                "Generate barcodes first for: {}",
                report.blocked.join(", ")
            ),
            "warning",
        );
    }
    if report.failed > 0 {
        notify(
            &app,
            "Save failed",
            &format!("{} location update(s) failed and were kept as drafts", report.failed),
            "error",
        );
    } else if report.updated > 0 {
        notify(
            &app,
            "Locations saved",
            &format!("{} location(s) updated", report.updated),
            "success",
        );
    }

    let snapshot = store.snapshot().map_err(String::from)?;
    emit_rows_updated(&app, &snapshot);
    serde_json::to_value(&report).map_err(|e| e.to_string())
}

/// Generate, persist and confirm a barcode for one row.
#[tauri::command]
pub async fn barcode_generate(
    arg0: Option<Value>,
    arg1: Option<String>,
    store: tauri::State<'_, RowStore>,
    loader: tauri::State<'_, RendererLoader>,
    db: tauri::State<'_, db::DbState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let symbology = arg0
        .as_ref()
        .and_then(|v| v.get("symbology"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let row_id = payload_string(arg0, arg1, &["rowId", "row_id", "id"]).ok_or("Missing rowId")?;
    let options = options_for(symbology.as_deref());

    let order_id = store
        .selected_order()
        .map_err(String::from)?
        .unwrap_or_default();
    let client = api::AdminClient::from_storage().map_err(|e| {
        notify_error(&app, &e);
        String::from(e)
    })?;
    let sink = AuditingSurfaceSink {
        inner: EventSurfaceSink::new(app.clone()),
        db: db.inner(),
        order_id,
        row_id: row_id.clone(),
        symbology: options.symbology,
        audit_id: Mutex::new(None),
    };

    match generate_row(&store, &client, &loader, &sink, &row_id, &options).await {
        Ok(GenerateOutcome::Generated {
            row_id,
            content,
            snapshot,
        }) => {
            sink.mark_persisted();
            notify(&app, "Success", "Barcode generated successfully", "success");
            emit_rows_updated(&app, &snapshot);
            serde_json::to_value(&GenerateOutcome::Generated {
                row_id,
                content,
                snapshot,
            })
            .map_err(|e| e.to_string())
        }
        Ok(outcome @ GenerateOutcome::AlreadyGenerated { .. }) => {
            notify(
                &app,
                "Already generated",
                "This line item already has a barcode",
                "info",
            );
            serde_json::to_value(&outcome).map_err(|e| e.to_string())
        }
        Err(err) => {
            notify_error(&app, &err);
            let snapshot = store.snapshot().map_err(String::from)?;
            emit_rows_updated(&app, &snapshot);
            Err(err.into())
        }
    }
}

/// Render a whole tier (order / product / line-item) into per-item surfaces
/// for the sheet or print view. Nothing is persisted.
#[tauri::command]
pub async fn barcode_generate_batch(
    arg0: Option<Value>,
    arg1: Option<String>,
    store: tauri::State<'_, RowStore>,
    loader: tauri::State<'_, RendererLoader>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let symbology = arg0
        .as_ref()
        .and_then(|v| v.get("symbology"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let tier_raw =
        payload_string(arg0, arg1, &["tier", "batchTier", "batch_tier"]).ok_or("Missing tier")?;
    let tier: BatchTier = serde_json::from_value(Value::String(tier_raw.clone()))
        .map_err(|_| format!("Unknown batch tier: {tier_raw}"))?;
    let options = options_for(symbology.as_deref());

    let sink = EventSurfaceSink::new(app.clone());
    match generate_batch(&store, &loader, &sink, tier, &options).await {
        Ok(summary) => {
            if summary.failed > 0 {
                notify(
                    &app,
                    "Batch finished with errors",
                    &format!(
                        "{} barcode(s) rendered, {} failed",
                        summary.rendered, summary.failed
                    ),
                    "warning",
                );
            } else {
                notify(
                    &app,
                    "Batch finished",
                    &format!("{} barcode(s) rendered", summary.rendered),
                    "success",
                );
            }
            serde_json::to_value(&summary).map_err(|e| e.to_string())
        }
        Err(err) => {
            notify_error(&app, &err);
            Err(err.into())
        }
    }
}

/// Recent generation audit entries for the selected order.
#[tauri::command]
pub async fn generation_history_get(
    arg0: Option<Value>,
    arg1: Option<String>,
    store: tauri::State<'_, RowStore>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Vec<Value>, String> {
    let order_id = payload_string(arg0, arg1, &["orderId", "order_id", "id"])
        .or_else(|| store.selected_order().ok().flatten())
        .ok_or("No order selected")?;
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    db::recent_generations(&conn, &order_id, 50)
}
