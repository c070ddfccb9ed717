//! Row store for the workbench table.
//!
//! Holds the UI-ready representation of the selected order's line items plus
//! ephemeral edit state (location drafts, loading flag). The row set is always
//! replaced wholesale from the admin dashboard — never patched in place — so
//! the table cannot silently diverge from server truth. Loads are tagged with
//! a monotonically increasing sequence number; a response that finishes after
//! a newer selection/reload started is discarded instead of overwriting it.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{lock_poisoned, WorkbenchError};

// ---------------------------------------------------------------------------
// Wire records (admin dashboard shapes)
// ---------------------------------------------------------------------------

/// One entry of the recent-orders picker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderOption {
    #[serde(alias = "value")]
    pub id: String,
    pub label: String,
}

/// A line item as returned by the line-items endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItemRecord {
    pub id: String,
    #[serde(default, alias = "order_number")]
    pub order_number: String,
    #[serde(default, alias = "product_name", alias = "name")]
    pub product_name: String,
    #[serde(default, alias = "product_code", alias = "sku")]
    pub product_code: Option<String>,
    #[serde(default)]
    pub quantity: u32,
    #[serde(default, alias = "unit_price", alias = "price")]
    pub unit_price: f64,
    #[serde(default, alias = "warehouse_location", alias = "location")]
    pub warehouse_location: Option<String>,
    #[serde(default, alias = "barcode_generated")]
    pub barcode_generated: bool,
    #[serde(default, alias = "barcode_image")]
    pub barcode_image: Option<String>,
}

/// A line item as returned by the with-barcodes endpoint (image included).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BarcodeRecord {
    pub id: String,
    #[serde(default, alias = "barcode_image", alias = "image")]
    pub barcode_image: String,
    #[serde(default, alias = "warehouse_location", alias = "location")]
    pub warehouse_location: Option<String>,
}

/// Payload for the persist endpoint. Image and location travel together —
/// the endpoint rejects partial updates.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BarcodeUpdate {
    pub row_id: String,
    pub barcode_image: String,
    pub location: String,
}

/// Remote order data collaborators. Production impl is `api::AdminClient`;
/// tests substitute in-memory fakes.
#[async_trait]
pub trait OrderDataSource: Send + Sync {
    async fn recent_orders(&self) -> Result<Vec<OrderOption>, WorkbenchError>;
    async fn order_line_items(&self, order_id: &str)
        -> Result<Vec<LineItemRecord>, WorkbenchError>;
    async fn line_items_with_barcodes(
        &self,
        order_id: &str,
    ) -> Result<Vec<BarcodeRecord>, WorkbenchError>;
    async fn persist_barcode(&self, update: &BarcodeUpdate) -> Result<(), WorkbenchError>;
}

// ---------------------------------------------------------------------------
// View model
// ---------------------------------------------------------------------------

/// One table row. `status_token` and `can_generate` are derived from
/// `barcode_generated` and recomputed on every mutation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineRow {
    pub id: String,
    pub order_number: String,
    pub product_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_code: Option<String>,
    pub quantity: u32,
    pub unit_price: f64,
    pub location: String,
    pub barcode_generated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub barcode_image: Option<String>,
    /// Render target key the frontend resolves to a DOM node.
    pub surface_key: String,
    pub status_token: &'static str,
    pub can_generate: bool,
}

impl OrderLineRow {
    fn from_record(rec: LineItemRecord) -> Self {
        let surface_key = format!("barcode-{}", rec.id);
        let mut row = Self {
            id: rec.id,
            order_number: rec.order_number,
            product_name: rec.product_name,
            product_code: rec.product_code,
            quantity: rec.quantity,
            unit_price: rec.unit_price,
            location: rec.warehouse_location.unwrap_or_default(),
            barcode_generated: rec.barcode_generated,
            barcode_image: rec.barcode_image.filter(|s| !s.is_empty()),
            surface_key,
            status_token: "pending",
            can_generate: true,
        };
        row.refresh_derived();
        row
    }

    fn refresh_derived(&mut self) {
        self.status_token = if self.barcode_generated {
            "generated"
        } else {
            "pending"
        };
        self.can_generate = !self.barcode_generated;
    }
}

/// Full view state handed to the frontend on every change.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowSnapshot {
    pub selected_order_id: Option<String>,
    pub rows: Vec<OrderLineRow>,
    pub has_rows: bool,
    pub has_any_generated: bool,
    pub is_loading: bool,
    pub draft_count: usize,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreInner {
    selected_order: Option<String>,
    rows: Vec<OrderLineRow>,
    drafts: HashMap<String, String>,
    is_loading: bool,
    load_seq: u64,
}

impl StoreInner {
    fn snapshot(&self) -> RowSnapshot {
        RowSnapshot {
            selected_order_id: self.selected_order.clone(),
            has_rows: !self.rows.is_empty(),
            has_any_generated: self.rows.iter().any(|r| r.barcode_generated),
            rows: self.rows.clone(),
            is_loading: self.is_loading,
            draft_count: self.drafts.len(),
        }
    }
}

/// Proof that a load was started; carries the sequence number the result must
/// still match to be applied.
#[derive(Debug)]
pub struct LoadTicket {
    pub order_id: String,
    seq: u64,
}

/// What `finish_load` did with a completed fetch.
#[derive(Debug)]
pub enum LoadOutcome {
    /// Rows replaced; snapshot reflects the new set.
    Replaced(RowSnapshot),
    /// A newer selection/reload superseded this fetch; result dropped.
    Stale,
    /// The fetch failed; rows cleared, loading flag cleared.
    Failed(WorkbenchError),
}

/// Tauri-managed state. All mutation of the row collection goes through the
/// methods here; the generation workflow never mutates rows it was handed.
#[derive(Default)]
pub struct RowStore {
    inner: Mutex<StoreInner>,
}

impl RowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Change the order selection. Drafts are cleared unconditionally. With a
    /// new order a `LoadTicket` is returned and the caller must run the load;
    /// with `None` the table is cleared without a fetch.
    pub fn select_order(&self, order_id: Option<String>) -> Result<Option<LoadTicket>, WorkbenchError> {
        let mut inner = self.inner.lock().map_err(lock_poisoned)?;
        inner.drafts.clear();
        inner.load_seq += 1;
        match order_id {
            Some(id) if !id.trim().is_empty() => {
                let id = id.trim().to_string();
                info!(order_id = %id, "order selected");
                inner.selected_order = Some(id.clone());
                inner.is_loading = true;
                Ok(Some(LoadTicket {
                    order_id: id,
                    seq: inner.load_seq,
                }))
            }
            _ => {
                debug!("order selection cleared");
                inner.selected_order = None;
                inner.rows.clear();
                inner.is_loading = false;
                Ok(None)
            }
        }
    }

    /// Start a reload of the current selection (after a save or generation,
    /// or an explicit refresh). Fails with `Validation` when nothing is
    /// selected. Bumping the sequence here also retires any in-flight load.
    pub fn begin_reload(&self) -> Result<LoadTicket, WorkbenchError> {
        let mut inner = self.inner.lock().map_err(lock_poisoned)?;
        let order_id = inner
            .selected_order
            .clone()
            .ok_or_else(|| WorkbenchError::Validation("No order selected".into()))?;
        inner.load_seq += 1;
        inner.is_loading = true;
        Ok(LoadTicket {
            order_id,
            seq: inner.load_seq,
        })
    }

    /// Apply the result of a fetch started with `select_order`/`begin_reload`.
    ///
    /// The loading flag is cleared on both success and failure — but only by
    /// the load that still owns the current sequence. A stale load must not
    /// clear the flag set by its successor.
    pub fn finish_load(
        &self,
        ticket: LoadTicket,
        result: Result<Vec<LineItemRecord>, WorkbenchError>,
    ) -> LoadOutcome {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if ticket.seq != inner.load_seq {
            debug!(
                order_id = %ticket.order_id,
                "discarding stale line-item response"
            );
            return LoadOutcome::Stale;
        }
        inner.is_loading = false;
        match result {
            Ok(records) => {
                inner.rows = records.into_iter().map(OrderLineRow::from_record).collect();
                // Drafts survive reloads (they are cleared on order change and
                // on save), but entries for rows that vanished are pruned.
                let live: Vec<String> = inner.rows.iter().map(|r| r.id.clone()).collect();
                inner.drafts.retain(|id, _| live.contains(id));
                info!(
                    order_id = %ticket.order_id,
                    rows = inner.rows.len(),
                    "row set replaced"
                );
                LoadOutcome::Replaced(inner.snapshot())
            }
            Err(err) => {
                warn!(order_id = %ticket.order_id, error = %err, "line-item load failed");
                inner.rows.clear();
                LoadOutcome::Failed(err)
            }
        }
    }

    // -- drafts -------------------------------------------------------------

    /// Buffer a location edit without touching the canonical row.
    pub fn set_draft_location(&self, row_id: &str, value: &str) -> Result<(), WorkbenchError> {
        let mut inner = self.inner.lock().map_err(lock_poisoned)?;
        if !inner.rows.iter().any(|r| r.id == row_id) {
            return Err(WorkbenchError::Validation(format!(
                "Unknown line item: {row_id}"
            )));
        }
        inner.drafts.insert(row_id.to_string(), value.to_string());
        Ok(())
    }

    pub fn drafts(&self) -> Result<HashMap<String, String>, WorkbenchError> {
        Ok(self.inner.lock().map_err(lock_poisoned)?.drafts.clone())
    }

    pub fn clear_draft(&self, row_id: &str) -> Result<(), WorkbenchError> {
        self.inner
            .lock()
            .map_err(lock_poisoned)?
            .drafts
            .remove(row_id);
        Ok(())
    }

    /// Location that a generation/save should persist for a row: pending
    /// draft first, then the canonical value, else empty ("unset").
    pub fn resolve_location(&self, row_id: &str) -> Result<String, WorkbenchError> {
        let inner = self.inner.lock().map_err(lock_poisoned)?;
        if let Some(draft) = inner.drafts.get(row_id) {
            return Ok(draft.clone());
        }
        Ok(inner
            .rows
            .iter()
            .find(|r| r.id == row_id)
            .map(|r| r.location.clone())
            .unwrap_or_default())
    }

    // -- row access / mutation ----------------------------------------------

    pub fn selected_order(&self) -> Result<Option<String>, WorkbenchError> {
        Ok(self.inner.lock().map_err(lock_poisoned)?.selected_order.clone())
    }

    pub fn row(&self, row_id: &str) -> Result<Option<OrderLineRow>, WorkbenchError> {
        let inner = self.inner.lock().map_err(lock_poisoned)?;
        Ok(inner.rows.iter().find(|r| r.id == row_id).cloned())
    }

    pub fn rows(&self) -> Result<Vec<OrderLineRow>, WorkbenchError> {
        Ok(self.inner.lock().map_err(lock_poisoned)?.rows.clone())
    }

    /// Optimistic update after a successful render: the row shows as
    /// generated before the persist call confirms.
    pub fn apply_generated(&self, row_id: &str, image: &str) -> Result<(), WorkbenchError> {
        let mut inner = self.inner.lock().map_err(lock_poisoned)?;
        let row = inner
            .rows
            .iter_mut()
            .find(|r| r.id == row_id)
            .ok_or_else(|| WorkbenchError::Validation(format!("Unknown line item: {row_id}")))?;
        row.barcode_generated = true;
        row.barcode_image = Some(image.to_string());
        row.refresh_derived();
        Ok(())
    }

    /// Roll an optimistic update back after a failed render or persist.
    pub fn revert_generated(&self, row_id: &str) -> Result<(), WorkbenchError> {
        let mut inner = self.inner.lock().map_err(lock_poisoned)?;
        if let Some(row) = inner.rows.iter_mut().find(|r| r.id == row_id) {
            row.barcode_generated = false;
            row.barcode_image = None;
            row.refresh_derived();
        }
        Ok(())
    }

    pub fn snapshot(&self) -> Result<RowSnapshot, WorkbenchError> {
        Ok(self.inner.lock().map_err(lock_poisoned)?.snapshot())
    }
}

/// Fetch line items for a started load and apply the outcome to the store.
pub async fn run_load(
    store: &RowStore,
    source: &dyn OrderDataSource,
    ticket: LoadTicket,
) -> LoadOutcome {
    let result = source.order_line_items(&ticket.order_id).await;
    store.finish_load(ticket, result)
}

// ===========================================================================
// Tests
// ===========================================================================
