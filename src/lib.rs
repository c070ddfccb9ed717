//! The Small Workbench - Tauri v2 Backend
//!
//! Desktop companion for the admin dashboard's order management: select an
//! order, generate barcodes for its line items, edit warehouse locations,
//! persist the results back to the platform, print a barcode sheet. All
//! state, remote I/O and render orchestration lives here; the frontend is a
//! thin view driven by the commands registered below and by the
//! `notification` / `rows_updated` / `barcode_rendered` events.

use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod api;
mod commands;
mod data_helpers;
mod db;
mod diagnostics;
mod error;
mod renderer;
mod rows;
mod sheet;
mod storage;
mod workbench;

const EXTERNAL_URL_MAX_LEN: usize = 2048;
const ALLOWED_EXTERNAL_HOSTS: &[&str] = &["thesmall.app", "admin.thesmall.app"];
const ALLOWED_EXTERNAL_HOST_SUFFIXES: &[&str] = &[".thesmall.app"];

// ---------------------------------------------------------------------------
// Event helpers
// ---------------------------------------------------------------------------

/// Fire-and-forget toast for the frontend notification area.
/// `severity` is one of `success` / `info` / `warning` / `error`.
pub(crate) fn notify(app: &tauri::AppHandle, title: &str, message: &str, severity: &str) {
    use tauri::Emitter;
    let _ = app.emit(
        "notification",
        serde_json::json!({
            "title": title,
            "message": message,
            "severity": severity,
        }),
    );
}

/// Surface a domain error as a toast. Internal errors show the generic
/// fallback instead of raw lock/SQL detail.
pub(crate) fn notify_error(app: &tauri::AppHandle, err: &error::WorkbenchError) {
    let message = match err {
        error::WorkbenchError::Internal(_) => err.fallback_message().to_string(),
        _ => err.to_string(),
    };
    notify(app, err.title(), &message, "error");
}

/// Push the full row snapshot to the table view.
pub(crate) fn emit_rows_updated(app: &tauri::AppHandle, snapshot: &rows::RowSnapshot) {
    use tauri::Emitter;
    let _ = app.emit("rows_updated", snapshot);
}

// ============================================================================
// App entry point
// ============================================================================

pub fn run() {
    // Initialize structured logging (console + rolling file)
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,the_small_workbench_lib=debug"));

    // Prune old log files before setting up the appender
    diagnostics::prune_old_logs();

    let log_dir = diagnostics::get_log_dir();
    std::fs::create_dir_all(&log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(&log_dir, "workbench");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    // Keep the guard alive for the lifetime of the app — dropping it flushes
    // logs. We leak it intentionally since the app runs until process exit.
    std::mem::forget(guard);

    info!("Starting The Small Workbench v{}", env!("CARGO_PKG_VERSION"));

    tauri::Builder::default()
        .setup(|app| {
            use tauri::Manager;

            let app_data_dir = app
                .path()
                .app_data_dir()
                .expect("Failed to get app data dir");

            let db_state = db::init(&app_data_dir).expect("Failed to initialize database");
            app.manage(db_state);

            app.manage(rows::RowStore::new());
            app.manage(renderer::RendererLoader::new(Box::new(
                renderer::RemoteRendererFactory,
            )));

            // Startup connectivity probe — log only; the settings screen
            // re-tests on demand.
            if storage::is_configured() {
                tauri::async_runtime::spawn(async move {
                    let admin_url =
                        storage::get_credential(storage::KEY_ADMIN_URL).unwrap_or_default();
                    let api_key =
                        storage::get_credential(storage::KEY_API_KEY).unwrap_or_default();
                    let result = api::test_connectivity(&admin_url, &api_key).await;
                    if !result.success {
                        warn!(error = ?result.error, "startup connectivity test failed");
                    }
                });
            } else {
                info!("workstation not paired yet");
            }

            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            commands::orders::orders_get_recent,
            commands::orders::order_select,
            commands::orders::order_items_reload,
            commands::orders::workbench_get_snapshot,
            commands::barcode::location_set_draft,
            commands::barcode::drafts_save,
            commands::barcode::barcode_generate,
            commands::barcode::barcode_generate_batch,
            commands::barcode::generation_history_get,
            commands::print::barcode_sheet_print,
            commands::print::invoice_open,
            commands::settings::workstation_config_get,
            commands::settings::workstation_pairing_update,
            commands::settings::workstation_connectivity_test,
            commands::settings::workstation_factory_reset,
            commands::settings::about_get,
        ])
        .run(tauri::generate_context!())
        .expect("error while running The Small Workbench");
}
