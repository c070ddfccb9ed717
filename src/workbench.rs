//! Barcode generation workflow.
//!
//! Sequences a generation end to end: guard checks, draft-preferred location
//! resolution, canonical content composition, renderer readiness, render,
//! optimistic row update, persist, reload. Rendered images are handed to a
//! [`SurfaceSink`] keyed by surface id — the workflow never touches a UI tree.
//!
//! A row marked generated before its persist confirms is rolled back when the
//! persist fails; the next reload would correct it anyway, the rollback
//! corrects it immediately.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::WorkbenchError;
use crate::renderer::{RenderOptions, RenderedBarcode, RendererLoader};
use crate::rows::{
    run_load, BarcodeUpdate, LoadOutcome, OrderDataSource, RowSnapshot, RowStore,
};

// ---------------------------------------------------------------------------
// Content composition
// ---------------------------------------------------------------------------

/// Canonical content for a single line-item barcode. Deterministic: the same
/// row always encodes to the same string.
pub fn compose_line_item_content(order_number: &str, product_name: &str, row_id: &str) -> String {
    format!("{order_number}-{product_name}-{row_id}")
}

/// Canonical content for a product-tier barcode: the product identifier
/// alone, preferring the code over the display name.
pub fn compose_product_content(product_code: Option<&str>, product_name: &str) -> String {
    match product_code {
        Some(code) if !code.trim().is_empty() => code.trim().to_string(),
        _ => product_name.trim().to_string(),
    }
}

/// Canonical content for an order-tier barcode: the order number alone.
pub fn compose_order_content(order_number: &str) -> String {
    order_number.trim().to_string()
}

/// Stable surface-key fragment for product tiles.
fn product_slug(content: &str) -> String {
    let mut slug = String::with_capacity(content.len());
    for c in content.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}

// ---------------------------------------------------------------------------
// Surface sink
// ---------------------------------------------------------------------------

/// Delivery of rendered images to their target surfaces. The production impl
/// emits a `barcode_rendered` event the frontend resolves to a DOM node.
pub trait SurfaceSink: Send + Sync {
    fn deliver(&self, surface_key: &str, rendered: &RenderedBarcode);
}

// ---------------------------------------------------------------------------
// Single-row generation
// ---------------------------------------------------------------------------

/// Result of a single-row generation request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase", tag = "outcome")]
pub enum GenerateOutcome {
    /// Barcode rendered, persisted and confirmed by a reload.
    Generated {
        row_id: String,
        content: String,
        snapshot: RowSnapshot,
    },
    /// The row already carries a barcode — informational, not an error.
    AlreadyGenerated {
        row_id: String,
        product_name: String,
    },
}

pub async fn generate_row(
    store: &RowStore,
    source: &dyn OrderDataSource,
    loader: &RendererLoader,
    surfaces: &dyn SurfaceSink,
    row_id: &str,
    options: &RenderOptions,
) -> Result<GenerateOutcome, WorkbenchError> {
    store
        .selected_order()?
        .ok_or_else(|| WorkbenchError::Validation("No order selected".into()))?;
    let row = store
        .row(row_id)?
        .ok_or_else(|| WorkbenchError::Validation(format!("Unknown line item: {row_id}")))?;

    if row.barcode_generated {
        info!(row_id, "barcode already generated, skipping");
        return Ok(GenerateOutcome::AlreadyGenerated {
            row_id: row.id,
            product_name: row.product_name,
        });
    }

    // Pending draft wins over the canonical value; empty means "unset".
    let location = store.resolve_location(row_id)?;
    let content = compose_line_item_content(&row.order_number, &row.product_name, &row.id);

    let renderer = loader.ensure_ready().await?;
    let rendered = renderer.render(&content, options).await?;

    // Optimistic: the table shows the barcode before the persist confirms.
    store.apply_generated(row_id, &rendered.image)?;
    surfaces.deliver(&row.surface_key, &rendered);

    let update = BarcodeUpdate {
        row_id: row.id.clone(),
        barcode_image: rendered.image.clone(),
        location,
    };
    if let Err(err) = source.persist_barcode(&update).await {
        warn!(row_id, error = %err, "persist failed, rolling back optimistic update");
        store.revert_generated(row_id)?;
        return Err(err);
    }

    store.clear_draft(row_id)?;
    let snapshot = reload_current(store, source).await?;
    info!(row_id, content = %content, "barcode generated and persisted");
    Ok(GenerateOutcome::Generated {
        row_id: row.id,
        content,
        snapshot,
    })
}

/// Reload the current selection and return the freshest snapshot available.
/// A reload failure after a successful persist is logged, not escalated —
/// the write has already been confirmed.
async fn reload_current(
    store: &RowStore,
    source: &dyn OrderDataSource,
) -> Result<RowSnapshot, WorkbenchError> {
    let ticket = store.begin_reload()?;
    match run_load(store, source, ticket).await {
        LoadOutcome::Replaced(snapshot) => Ok(snapshot),
        LoadOutcome::Stale => store.snapshot(),
        LoadOutcome::Failed(err) => {
            warn!(error = %err, "post-save reload failed");
            store.snapshot()
        }
    }
}

// ---------------------------------------------------------------------------
// Batch generation
// ---------------------------------------------------------------------------

/// Which collection a batch render walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchTier {
    Order,
    Product,
    #[serde(alias = "lineitem", alias = "lineItem")]
    LineItem,
}

impl BatchTier {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchTier::Order => "order",
            BatchTier::Product => "product",
            BatchTier::LineItem => "line_item",
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub tier: &'static str,
    pub rendered: usize,
    pub failed: usize,
}

/// Render a whole tier into per-item surfaces. Nothing is persisted — batch
/// rendering feeds the sheet/print view. Per-item failures (including a
/// renderer that cannot come up) are logged and do not stop the batch.
pub async fn generate_batch(
    store: &RowStore,
    loader: &RendererLoader,
    surfaces: &dyn SurfaceSink,
    tier: BatchTier,
    options: &RenderOptions,
) -> Result<BatchSummary, WorkbenchError> {
    let order_id = store
        .selected_order()?
        .ok_or_else(|| WorkbenchError::Validation("No order selected".into()))?;
    let rows = store.rows()?;
    if rows.is_empty() {
        return Err(WorkbenchError::Validation(
            "No line items loaded for the selected order".into(),
        ));
    }

    let items: Vec<(String, String)> = match tier {
        BatchTier::Order => {
            let content = compose_order_content(&rows[0].order_number);
            vec![(format!("barcode-order-{order_id}"), content)]
        }
        BatchTier::Product => {
            let mut seen = Vec::new();
            let mut items = Vec::new();
            for row in &rows {
                let content =
                    compose_product_content(row.product_code.as_deref(), &row.product_name);
                if content.is_empty() || seen.contains(&content) {
                    continue;
                }
                seen.push(content.clone());
                items.push((format!("barcode-product-{}", product_slug(&content)), content));
            }
            items
        }
        BatchTier::LineItem => rows
            .iter()
            .map(|row| (format!("barcode-item-{}", row.id), row.id.clone()))
            .collect(),
    };

    let mut summary = BatchSummary {
        tier: tier.as_str(),
        rendered: 0,
        failed: 0,
    };
    for (surface_key, content) in items {
        // ensure_ready inside the loop: a loader failure only sinks this
        // item, and the memoized load makes the happy path free.
        let rendered = match loader.ensure_ready().await {
            Ok(renderer) => renderer.render(&content, options).await,
            Err(err) => Err(err),
        };
        match rendered {
            Ok(rendered) => {
                surfaces.deliver(&surface_key, &rendered);
                summary.rendered += 1;
            }
            Err(err) => {
                warn!(surface = %surface_key, error = %err, "batch item render failed");
                summary.failed += 1;
            }
        }
    }

    info!(
        tier = tier.as_str(),
        rendered = summary.rendered,
        failed = summary.failed,
        "batch render finished"
    );
    Ok(summary)
}

// ---------------------------------------------------------------------------
// Draft saving
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveDraftsReport {
    pub updated: usize,
    pub failed: usize,
    /// Product names of rows whose save was rejected locally because no
    /// barcode exists yet (the persist endpoint needs image + location
    /// together, and there is no image to re-send).
    pub blocked: Vec<String>,
    pub reloaded: bool,
}

pub async fn save_drafts(
    store: &RowStore,
    source: &dyn OrderDataSource,
) -> Result<SaveDraftsReport, WorkbenchError> {
    let order_id = store
        .selected_order()?
        .ok_or_else(|| WorkbenchError::Validation("No order selected".into()))?;
    let drafts = store.drafts()?;
    if drafts.is_empty() {
        return Ok(SaveDraftsReport::default());
    }

    let rows = store.rows()?;
    let mut report = SaveDraftsReport::default();
    let mut eligible: Vec<(String, String)> = Vec::new();

    for (row_id, location) in drafts {
        match rows.iter().find(|r| r.id == row_id) {
            Some(row) if row.barcode_generated => eligible.push((row_id, location)),
            Some(row) => {
                // Rejected locally: no network call for this row.
                report.blocked.push(row.product_name.clone());
                store.clear_draft(&row_id)?;
            }
            None => {
                store.clear_draft(&row_id)?;
            }
        }
    }

    if !eligible.is_empty() {
        // The persist endpoint requires the image alongside the location, so
        // the existing image must be re-fetched first. If that fetch fails,
        // every pending draft stays pending for a retry.
        let records = match source.line_items_with_barcodes(&order_id).await {
            Ok(records) => records,
            Err(err) => {
                warn!(error = %err, "with-barcodes fetch failed, drafts left pending");
                let _ = reload_current(store, source).await;
                return Err(err);
            }
        };

        for (row_id, location) in eligible {
            let image = records
                .iter()
                .find(|r| r.id == row_id)
                .map(|r| r.barcode_image.clone())
                .filter(|img| !img.is_empty());
            let Some(image) = image else {
                warn!(row_id = %row_id, "no persisted image for generated row, draft kept");
                report.failed += 1;
                continue;
            };
            let update = BarcodeUpdate {
                row_id: row_id.clone(),
                barcode_image: image,
                location,
            };
            match source.persist_barcode(&update).await {
                Ok(()) => {
                    store.clear_draft(&row_id)?;
                    report.updated += 1;
                }
                Err(err) => {
                    warn!(row_id = %row_id, error = %err, "location update failed, draft kept");
                    report.failed += 1;
                }
            }
        }
    }

    // Displayed state always ends on confirmed server truth.
    report.reloaded = matches!(
        run_load(store, source, store.begin_reload()?).await,
        LoadOutcome::Replaced(_)
    );
    info!(
        updated = report.updated,
        failed = report.failed,
        blocked = report.blocked.len(),
        "draft save finished"
    );
    Ok(report)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::{
        encode_png_data_url, BarcodeRenderer, RendererFactory, RendererLoader,
    };
    use crate::rows::{BarcodeRecord, LineItemRecord, OrderOption};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    // -- fakes --------------------------------------------------------------

    #[derive(Default)]
    struct MockState {
        line_items: Vec<LineItemRecord>,
        persist_calls: Vec<BarcodeUpdate>,
        fail_persist: bool,
        fail_with_barcodes: bool,
    }

    #[derive(Default)]
    struct MockSource {
        state: Mutex<MockState>,
    }

    impl MockSource {
        fn with_items(items: Vec<LineItemRecord>) -> Self {
            Self {
                state: Mutex::new(MockState {
                    line_items: items,
                    ..Default::default()
                }),
            }
        }

        fn persist_calls(&self) -> Vec<BarcodeUpdate> {
            self.state.lock().unwrap().persist_calls.clone()
        }
    }

    #[async_trait]
    impl OrderDataSource for MockSource {
        async fn recent_orders(&self) -> Result<Vec<OrderOption>, WorkbenchError> {
            Ok(vec![OrderOption {
                id: "O-1".into(),
                label: "SO-100 — Acme".into(),
            }])
        }

        async fn order_line_items(
            &self,
            _order_id: &str,
        ) -> Result<Vec<LineItemRecord>, WorkbenchError> {
            Ok(self.state.lock().unwrap().line_items.clone())
        }

        async fn line_items_with_barcodes(
            &self,
            _order_id: &str,
        ) -> Result<Vec<BarcodeRecord>, WorkbenchError> {
            let state = self.state.lock().unwrap();
            if state.fail_with_barcodes {
                return Err(WorkbenchError::Fetch("with-barcodes fetch failed".into()));
            }
            Ok(state
                .line_items
                .iter()
                .filter(|r| r.barcode_generated)
                .map(|r| BarcodeRecord {
                    id: r.id.clone(),
                    barcode_image: r.barcode_image.clone().unwrap_or_default(),
                    warehouse_location: r.warehouse_location.clone(),
                })
                .collect())
        }

        async fn persist_barcode(&self, update: &BarcodeUpdate) -> Result<(), WorkbenchError> {
            let mut state = self.state.lock().unwrap();
            if state.fail_persist {
                return Err(WorkbenchError::Persist("update rejected".into()));
            }
            state.persist_calls.push(update.clone());
            // Server behavior: the row now carries the barcode + location.
            if let Some(item) = state.line_items.iter_mut().find(|i| i.id == update.row_id) {
                item.barcode_generated = true;
                item.barcode_image = Some(update.barcode_image.clone());
                item.warehouse_location = Some(update.location.clone());
            }
            Ok(())
        }
    }

    #[derive(Debug)]
    struct StubRenderer {
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl BarcodeRenderer for StubRenderer {
        async fn render(
            &self,
            content: &str,
            _options: &RenderOptions,
        ) -> Result<RenderedBarcode, WorkbenchError> {
            if let Some(marker) = self.fail_on {
                if content.contains(marker) {
                    return Err(WorkbenchError::Render(format!(
                        "cannot encode: {content}"
                    )));
                }
            }
            Ok(RenderedBarcode {
                content: content.to_string(),
                image: encode_png_data_url(content.as_bytes()),
            })
        }
    }

    struct StubFactory {
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl RendererFactory for StubFactory {
        async fn load(&self) -> Result<Arc<dyn BarcodeRenderer>, WorkbenchError> {
            Ok(Arc::new(StubRenderer {
                fail_on: self.fail_on,
            }))
        }
    }

    fn loader(fail_on: Option<&'static str>) -> RendererLoader {
        RendererLoader::new(Box::new(StubFactory { fail_on }))
    }

    #[derive(Default)]
    struct RecordingSink {
        delivered: Mutex<Vec<(String, String)>>,
    }

    impl SurfaceSink for RecordingSink {
        fn deliver(&self, surface_key: &str, rendered: &RenderedBarcode) {
            self.delivered
                .lock()
                .unwrap()
                .push((surface_key.to_string(), rendered.content.clone()));
        }
    }

    fn item(id: &str, product: &str, generated: bool) -> LineItemRecord {
        LineItemRecord {
            id: id.into(),
            order_number: "SO-100".into(),
            product_name: product.into(),
            quantity: 1,
            unit_price: 4.0,
            warehouse_location: Some("A-01".into()),
            barcode_generated: generated,
            barcode_image: generated
                .then(|| encode_png_data_url(format!("existing-{id}").as_bytes())),
            ..Default::default()
        }
    }

    async fn loaded_store(source: &MockSource) -> RowStore {
        let store = RowStore::new();
        let ticket = store.select_order(Some("O-1".into())).unwrap().unwrap();
        run_load(&store, source, ticket).await;
        store
    }

    // -- content composition ------------------------------------------------

    #[test]
    fn test_compose_content_is_deterministic() {
        let a = compose_line_item_content("SO-100", "Widget", "abc123");
        let b = compose_line_item_content("SO-100", "Widget", "abc123");
        assert_eq!(a, "SO-100-Widget-abc123");
        assert_eq!(a, b);
    }

    #[test]
    fn test_compose_product_prefers_code() {
        assert_eq!(compose_product_content(Some("SKU-9"), "Widget"), "SKU-9");
        assert_eq!(compose_product_content(Some("  "), "Widget"), "Widget");
        assert_eq!(compose_product_content(None, "Widget"), "Widget");
    }

    #[test]
    fn test_product_slug_is_stable() {
        assert_eq!(product_slug("Widget Mk II"), "widget-mk-ii");
        assert_eq!(product_slug("SKU-9"), "sku-9");
    }

    // -- single-row generation ----------------------------------------------

    #[tokio::test]
    async fn test_generate_row_happy_path() {
        let source = MockSource::with_items(vec![item("li-1", "Widget", false), item("li-2", "Bolt", false)]);
        let store = loaded_store(&source).await;
        let loader = loader(None);
        let sink = RecordingSink::default();

        assert!(!store.snapshot().unwrap().has_any_generated);

        let outcome = generate_row(
            &store,
            &source,
            &loader,
            &sink,
            "li-1",
            &RenderOptions::default(),
        )
        .await
        .unwrap();

        let GenerateOutcome::Generated { snapshot, content, .. } = outcome else {
            panic!("expected Generated outcome");
        };
        assert_eq!(content, "SO-100-Widget-li-1");
        assert!(snapshot.has_any_generated);

        // Reload confirmed server truth: row 1 generated with image, row 2 untouched.
        let row1 = snapshot.rows.iter().find(|r| r.id == "li-1").unwrap();
        assert!(row1.barcode_generated);
        assert!(row1.barcode_image.as_deref().is_some_and(|i| !i.is_empty()));
        let row2 = snapshot.rows.iter().find(|r| r.id == "li-2").unwrap();
        assert!(!row2.barcode_generated);

        // One persist, one surface delivery.
        assert_eq!(source.persist_calls().len(), 1);
        let delivered = sink.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, "barcode-li-1");
    }

    #[tokio::test]
    async fn test_generate_row_twice_is_informational() {
        let source = MockSource::with_items(vec![item("li-1", "Widget", false)]);
        let store = loaded_store(&source).await;
        let loader = loader(None);
        let sink = RecordingSink::default();

        let first = generate_row(&store, &source, &loader, &sink, "li-1", &RenderOptions::default())
            .await
            .unwrap();
        assert!(matches!(first, GenerateOutcome::Generated { .. }));

        let second = generate_row(&store, &source, &loader, &sink, "li-1", &RenderOptions::default())
            .await
            .unwrap();
        let GenerateOutcome::AlreadyGenerated { product_name, .. } = second else {
            panic!("expected AlreadyGenerated outcome");
        };
        assert_eq!(product_name, "Widget");
        // No second persist happened.
        assert_eq!(source.persist_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_generate_rolls_back_on_persist_failure() {
        let source = MockSource::with_items(vec![item("li-1", "Widget", false)]);
        let store = loaded_store(&source).await;
        source.state.lock().unwrap().fail_persist = true;
        let loader = loader(None);
        let sink = RecordingSink::default();

        let err = generate_row(&store, &source, &loader, &sink, "li-1", &RenderOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkbenchError::Persist(_)));

        let snap = store.snapshot().unwrap();
        let row = &snap.rows[0];
        assert!(!row.barcode_generated);
        assert!(row.barcode_image.is_none());
        assert!(row.can_generate);
        assert!(!snap.has_any_generated);
    }

    #[tokio::test]
    async fn test_generate_requires_order_selection() {
        let source = MockSource::with_items(vec![]);
        let store = RowStore::new();
        let loader = loader(None);
        let sink = RecordingSink::default();

        let err = generate_row(&store, &source, &loader, &sink, "li-1", &RenderOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkbenchError::Validation(_)));
    }

    #[tokio::test]
    async fn test_generate_persists_draft_location() {
        let source = MockSource::with_items(vec![item("li-1", "Widget", false)]);
        let store = loaded_store(&source).await;
        store.set_draft_location("li-1", "B-07").unwrap();
        let loader = loader(None);
        let sink = RecordingSink::default();

        generate_row(&store, &source, &loader, &sink, "li-1", &RenderOptions::default())
            .await
            .unwrap();

        let calls = source.persist_calls();
        assert_eq!(calls[0].location, "B-07");
        // Draft consumed by the save.
        assert!(store.drafts().unwrap().is_empty());
    }

    // -- batch tiers ---------------------------------------------------------

    #[tokio::test]
    async fn test_batch_line_item_failures_are_isolated() {
        let source = MockSource::with_items(vec![item("li-ok", "Widget", false), item("li-bad", "Bolt", false)]);
        let store = loaded_store(&source).await;
        let loader = loader(Some("bad"));
        let sink = RecordingSink::default();

        let summary = generate_batch(
            &store,
            &loader,
            &sink,
            BatchTier::LineItem,
            &RenderOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(summary.rendered, 1);
        assert_eq!(summary.failed, 1);
        let delivered = sink.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, "barcode-item-li-ok");
    }

    #[tokio::test]
    async fn test_batch_order_tier_encodes_order_number() {
        let source = MockSource::with_items(vec![item("li-1", "Widget", false)]);
        let store = loaded_store(&source).await;
        let loader = loader(None);
        let sink = RecordingSink::default();

        let summary = generate_batch(
            &store,
            &loader,
            &sink,
            BatchTier::Order,
            &RenderOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(summary.rendered, 1);
        let delivered = sink.delivered.lock().unwrap();
        assert_eq!(delivered[0].0, "barcode-order-O-1");
        assert_eq!(delivered[0].1, "SO-100");
    }

    #[tokio::test]
    async fn test_batch_product_tier_dedupes_products() {
        let source = MockSource::with_items(vec![
            item("li-1", "Widget", false),
            item("li-2", "Widget", false),
            item("li-3", "Bolt", false),
        ]);
        let store = loaded_store(&source).await;
        let loader = loader(None);
        let sink = RecordingSink::default();

        let summary = generate_batch(
            &store,
            &loader,
            &sink,
            BatchTier::Product,
            &RenderOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(summary.rendered, 2);
        let delivered = sink.delivered.lock().unwrap();
        let keys: Vec<&str> = delivered.iter().map(|(k, _)| k.as_str()).collect();
        assert!(keys.contains(&"barcode-product-widget"));
        assert!(keys.contains(&"barcode-product-bolt"));
    }

    // -- draft saving ---------------------------------------------------------

    #[tokio::test]
    async fn test_save_drafts_blocks_ungenerated_rows() {
        let source = MockSource::with_items(vec![item("li-1", "Widget", false)]);
        let store = loaded_store(&source).await;
        store.set_draft_location("li-1", "B-07").unwrap();

        let report = save_drafts(&store, &source).await.unwrap();

        assert_eq!(report.blocked, vec!["Widget".to_string()]);
        assert_eq!(report.updated, 0);
        // Zero persist calls for blocked rows.
        assert!(source.persist_calls().is_empty());
        assert!(store.drafts().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_drafts_updates_generated_rows_with_existing_image() {
        let source = MockSource::with_items(vec![item("li-1", "Widget", true)]);
        let store = loaded_store(&source).await;
        store.set_draft_location("li-1", "B-07").unwrap();

        let report = save_drafts(&store, &source).await.unwrap();

        assert_eq!(report.updated, 1);
        assert!(report.blocked.is_empty());
        assert!(report.reloaded);

        let calls = source.persist_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].location, "B-07");
        // The persisted image is the one re-fetched from the platform.
        assert_eq!(
            calls[0].barcode_image,
            encode_png_data_url(b"existing-li-1")
        );
        assert!(store.drafts().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_drafts_keeps_drafts_when_image_fetch_fails() {
        let source = MockSource::with_items(vec![item("li-1", "Widget", true)]);
        let store = loaded_store(&source).await;
        store.set_draft_location("li-1", "B-07").unwrap();
        source.state.lock().unwrap().fail_with_barcodes = true;

        let err = save_drafts(&store, &source).await.unwrap_err();
        assert!(matches!(err, WorkbenchError::Fetch(_)));
        // Draft left pending for retry.
        assert_eq!(store.drafts().unwrap().len(), 1);
        assert!(source.persist_calls().is_empty());
    }

    #[tokio::test]
    async fn test_save_drafts_counts_missing_image_as_failure() {
        // Row claims generated but the with-barcodes fetch carries no image —
        // the persist call must not be attempted with an empty payload.
        let mut rec = item("li-1", "Widget", true);
        rec.barcode_image = Some(String::new());
        let source = MockSource::with_items(vec![rec]);
        let store = loaded_store(&source).await;
        store.set_draft_location("li-1", "B-07").unwrap();

        let report = save_drafts(&store, &source).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.updated, 0);
        assert!(source.persist_calls().is_empty());
        // Draft kept for retry once the image exists.
        assert_eq!(store.drafts().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_save_drafts_with_no_drafts_is_a_no_op() {
        let source = MockSource::with_items(vec![item("li-1", "Widget", true)]);
        let store = loaded_store(&source).await;

        let report = save_drafts(&store, &source).await.unwrap();
        assert_eq!(report.updated, 0);
        assert!(!report.reloaded);
        assert!(source.persist_calls().is_empty());
    }
}
