//! Order selection and row-loading commands.

use serde_json::Value;
use tracing::warn;

use crate::commands::payload_string;
use crate::rows::{run_load, LoadOutcome, RowStore};
use crate::{api, data_helpers, db, emit_rows_updated, notify, notify_error};

const RECENT_ORDERS_CACHE_KEY: &str = "recent_orders_cache";

/// Fetch the recent-orders picker entries. Falls back to the last cached
/// list when the admin dashboard is unreachable, so an offline workstation
/// still shows something to select.
#[tauri::command]
pub async fn orders_get_recent(
    db: tauri::State<'_, db::DbState>,
    app: tauri::AppHandle,
) -> Result<Vec<Value>, String> {
    let client = match api::AdminClient::from_storage() {
        Ok(c) => c,
        Err(err) => {
            notify_error(&app, &err);
            return Err(err.into());
        }
    };

    use crate::rows::OrderDataSource as _;
    match client.recent_orders().await {
        Ok(options) => {
            let values: Vec<Value> = options
                .iter()
                .filter_map(|o| serde_json::to_value(o).ok())
                .collect();
            if let Err(e) = data_helpers::write_local_json(
                &db,
                RECENT_ORDERS_CACHE_KEY,
                &Value::Array(values.clone()),
            ) {
                warn!(error = %e, "failed to cache recent orders");
            }
            Ok(values)
        }
        Err(err) => {
            let cached = data_helpers::read_local_json_array(&db, RECENT_ORDERS_CACHE_KEY)
                .unwrap_or_default();
            if cached.is_empty() {
                notify_error(&app, &err);
                return Err(err.into());
            }
            warn!(error = %err, "recent orders fetch failed, serving cached list");
            notify(
                &app,
                "Offline",
                "Showing cached orders — the admin dashboard is unreachable",
                "warning",
            );
            Ok(cached)
        }
    }
}

/// Change the order selection. Clears drafts, loads the new order's line
/// items (or clears the table for an empty selection) and returns the
/// resulting snapshot.
#[tauri::command]
pub async fn order_select(
    arg0: Option<Value>,
    arg1: Option<String>,
    store: tauri::State<'_, RowStore>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let order_id = payload_string(arg0, arg1, &["orderId", "order_id", "id", "value"]);

    // Build the client before touching the store so a pairing problem cannot
    // leave the loading flag set with no load to clear it.
    let client = if order_id.is_some() {
        Some(api::AdminClient::from_storage().map_err(|e| {
            notify_error(&app, &e);
            String::from(e)
        })?)
    } else {
        None
    };

    let ticket = store.select_order(order_id).map_err(|e| {
        notify_error(&app, &e);
        String::from(e)
    })?;

    match (ticket, client) {
        (Some(ticket), Some(client)) => finish_and_report(&store, &client, ticket, &app).await,
        _ => {
            let snapshot = store.snapshot().map_err(String::from)?;
            emit_rows_updated(&app, &snapshot);
            serde_json::to_value(&snapshot).map_err(|e| e.to_string())
        }
    }
}

/// Reload the current selection from the admin dashboard.
#[tauri::command]
pub async fn order_items_reload(
    store: tauri::State<'_, RowStore>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let client = api::AdminClient::from_storage().map_err(|e| {
        notify_error(&app, &e);
        String::from(e)
    })?;
    let ticket = store.begin_reload().map_err(|e| {
        notify_error(&app, &e);
        String::from(e)
    })?;
    finish_and_report(&store, &client, ticket, &app).await
}

/// Current view state without any fetch.
#[tauri::command]
pub async fn workbench_get_snapshot(store: tauri::State<'_, RowStore>) -> Result<Value, String> {
    let snapshot = store.snapshot().map_err(String::from)?;
    serde_json::to_value(&snapshot).map_err(|e| e.to_string())
}

async fn finish_and_report(
    store: &RowStore,
    client: &api::AdminClient,
    ticket: crate::rows::LoadTicket,
    app: &tauri::AppHandle,
) -> Result<Value, String> {
    match run_load(store, client, ticket).await {
        LoadOutcome::Replaced(snapshot) => {
            emit_rows_updated(app, &snapshot);
            serde_json::to_value(&snapshot).map_err(|e| e.to_string())
        }
        LoadOutcome::Stale => {
            // A newer selection owns the table now; report its state.
            let snapshot = store.snapshot().map_err(String::from)?;
            serde_json::to_value(&snapshot).map_err(|e| e.to_string())
        }
        LoadOutcome::Failed(err) => {
            notify_error(app, &err);
            let snapshot = store.snapshot().map_err(String::from)?;
            emit_rows_updated(app, &snapshot);
            Err(err.into())
        }
    }
}
