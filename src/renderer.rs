//! Barcode rendering capability and its one-time loader.
//!
//! The workbench never encodes Code128/QR itself — rendering is delegated to
//! the admin dashboard's hosted render endpoint, treated as an opaque
//! content-string → image function. The loader performs the renderer
//! handshake exactly once per session: concurrent first callers share one
//! in-flight load, later callers get the cached capability, and a failed load
//! leaves the loader retryable.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::api::AdminClient;
use crate::error::WorkbenchError;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Symbology {
    Code128,
    Qr,
}

impl Symbology {
    pub fn as_str(self) -> &'static str {
        match self {
            Symbology::Code128 => "code128",
            Symbology::Qr => "qr",
        }
    }
}

/// Render options passed through to the render capability unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderOptions {
    pub symbology: Symbology,
    /// Bar module width in pixels (1D) or module size (QR).
    pub width: u32,
    pub height: u32,
    pub margin: u32,
    /// Whether the renderer prints the content under the bars.
    pub display_value: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            symbology: Symbology::Code128,
            width: 2,
            height: 100,
            margin: 10,
            display_value: false,
        }
    }
}

impl RenderOptions {
    pub fn qr() -> Self {
        Self {
            symbology: Symbology::Qr,
            width: 4,
            height: 200,
            margin: 8,
            display_value: false,
        }
    }
}

/// A rendered barcode: the canonical content echoed back plus the PNG image
/// as a data-URL (the exact payload later persisted and re-fetched).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedBarcode {
    pub content: String,
    pub image: String,
}

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

/// The render capability. Implementations may complete synchronously or
/// suspend; callers only ever await.
#[async_trait]
pub trait BarcodeRenderer: Send + Sync + std::fmt::Debug {
    async fn render(
        &self,
        content: &str,
        options: &RenderOptions,
    ) -> Result<RenderedBarcode, WorkbenchError>;
}

/// One-time construction of the render capability (the session's renderer
/// handshake). Split from [`BarcodeRenderer`] so tests can count loads.
#[async_trait]
pub trait RendererFactory: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn BarcodeRenderer>, WorkbenchError>;
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Lazy singleton around the render capability.
///
/// First caller triggers the factory; everyone who arrives before resolution
/// awaits the same load. After a successful load the capability is cached for
/// the rest of the session. After a failed load the cell stays empty, so the
/// next `ensure_ready` retries from scratch.
pub struct RendererLoader {
    factory: Box<dyn RendererFactory>,
    ready: OnceCell<Arc<dyn BarcodeRenderer>>,
}

impl RendererLoader {
    pub fn new(factory: Box<dyn RendererFactory>) -> Self {
        Self {
            factory,
            ready: OnceCell::new(),
        }
    }

    /// Resolve the render capability, loading it on first use.
    pub async fn ensure_ready(&self) -> Result<Arc<dyn BarcodeRenderer>, WorkbenchError> {
        self.ready
            .get_or_try_init(|| async {
                info!("loading barcode renderer");
                let renderer = self.factory.load().await?;
                info!("barcode renderer ready");
                Ok(renderer)
            })
            .await
            .cloned()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.initialized()
    }
}

// ---------------------------------------------------------------------------
// Production impl (admin dashboard render endpoint)
// ---------------------------------------------------------------------------

/// Renderer backed by the admin dashboard's render endpoint.
#[derive(Debug)]
pub struct RemoteRenderer;

#[async_trait]
impl BarcodeRenderer for RemoteRenderer {
    async fn render(
        &self,
        content: &str,
        options: &RenderOptions,
    ) -> Result<RenderedBarcode, WorkbenchError> {
        if content.trim().is_empty() {
            return Err(WorkbenchError::Validation(
                "Barcode content cannot be empty".into(),
            ));
        }
        let client = AdminClient::from_storage()?;
        let payload = serde_json::json!({
            "content": content,
            "format": options.symbology.as_str(),
            "width": options.width,
            "height": options.height,
            "margin": options.margin,
            "displayValue": options.display_value,
        });
        let resp = client.render_barcode(&payload).await?;
        let image = resp
            .get("image")
            .or_else(|| resp.get("dataUrl"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                WorkbenchError::Render("Renderer returned no image payload".into())
            })?;
        Ok(RenderedBarcode {
            content: content.to_string(),
            image: image.to_string(),
        })
    }
}

/// Factory performing the renderer handshake: fetch the renderer profile and
/// check the symbologies this workbench needs are available.
pub struct RemoteRendererFactory;

#[async_trait]
impl RendererFactory for RemoteRendererFactory {
    async fn load(&self) -> Result<Arc<dyn BarcodeRenderer>, WorkbenchError> {
        let client = AdminClient::from_storage()
            .map_err(|e| WorkbenchError::DependencyLoad(e.to_string()))?;
        let profile = client.renderer_profile().await?;

        let symbologies: Vec<String> = profile
            .get("symbologies")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_ascii_lowercase)
                    .collect()
            })
            .unwrap_or_default();
        for needed in [Symbology::Code128, Symbology::Qr] {
            if !symbologies.iter().any(|s| s == needed.as_str()) {
                warn!(symbology = needed.as_str(), "renderer profile missing symbology");
                return Err(WorkbenchError::DependencyLoad(format!(
                    "Renderer does not support {}",
                    needed.as_str()
                )));
            }
        }

        info!(symbologies = ?symbologies, "renderer profile accepted");
        Ok(Arc::new(RemoteRenderer))
    }
}

// ---------------------------------------------------------------------------
// Data-URL helpers
// ---------------------------------------------------------------------------

pub const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

/// Encode raw PNG bytes as the data-URL payload persisted to the platform.
pub fn encode_png_data_url(bytes: &[u8]) -> String {
    format!("{PNG_DATA_URL_PREFIX}{}", BASE64_STANDARD.encode(bytes))
}

/// Decode a `data:image/*;base64,` payload back into raw bytes.
pub fn decode_data_url(data_url: &str) -> Result<Vec<u8>, WorkbenchError> {
    let rest = data_url
        .strip_prefix("data:")
        .ok_or_else(|| WorkbenchError::Validation("Not a data-URL".into()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| WorkbenchError::Validation("Malformed data-URL".into()))?;
    if !meta.starts_with("image/") || !meta.ends_with(";base64") {
        return Err(WorkbenchError::Validation(format!(
            "Unsupported data-URL media type: {meta}"
        )));
    }
    BASE64_STANDARD
        .decode(payload.trim())
        .map_err(|e| WorkbenchError::Validation(format!("Invalid base64 image payload: {e}")))
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug)]
    struct StubRenderer;

    #[async_trait]
    impl BarcodeRenderer for StubRenderer {
        async fn render(
            &self,
            content: &str,
            _options: &RenderOptions,
        ) -> Result<RenderedBarcode, WorkbenchError> {
            Ok(RenderedBarcode {
                content: content.to_string(),
                image: encode_png_data_url(content.as_bytes()),
            })
        }
    }

    /// Counts loads; optionally fails the first `fail_first` attempts.
    struct CountingFactory {
        loads: Arc<AtomicUsize>,
        fail_first: usize,
    }

    impl CountingFactory {
        fn new(fail_first: usize) -> (Self, Arc<AtomicUsize>) {
            let loads = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    loads: loads.clone(),
                    fail_first,
                },
                loads,
            )
        }
    }

    #[async_trait]
    impl RendererFactory for CountingFactory {
        async fn load(&self) -> Result<Arc<dyn BarcodeRenderer>, WorkbenchError> {
            let n = self.loads.fetch_add(1, Ordering::SeqCst);
            // Hold the load open long enough for concurrent callers to pile up.
            tokio::time::sleep(Duration::from_millis(20)).await;
            if n < self.fail_first {
                return Err(WorkbenchError::DependencyLoad("profile fetch failed".into()));
            }
            Ok(Arc::new(StubRenderer))
        }
    }

    #[tokio::test]
    async fn test_concurrent_ensure_ready_loads_once() {
        let (factory, loads) = CountingFactory::new(0);
        let loader = Arc::new(RendererLoader::new(Box::new(factory)));
        let a = {
            let loader = loader.clone();
            tokio::spawn(async move { loader.ensure_ready().await.is_ok() })
        };
        let b = {
            let loader = loader.clone();
            tokio::spawn(async move { loader.ensure_ready().await.is_ok() })
        };
        assert!(a.await.unwrap());
        assert!(b.await.unwrap());
        assert!(loader.is_ready());
        // Both callers shared the single underlying load.
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_load_is_retryable() {
        let (factory, loads) = CountingFactory::new(1);
        let loader = RendererLoader::new(Box::new(factory));
        let err = loader.ensure_ready().await.unwrap_err();
        assert!(matches!(err, WorkbenchError::DependencyLoad(_)));
        assert!(!loader.is_ready());

        // Second call retries the factory and succeeds.
        assert!(loader.ensure_ready().await.is_ok());
        assert!(loader.is_ready());
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_ready_loader_returns_immediately() {
        let (factory, loads) = CountingFactory::new(0);
        let loader = RendererLoader::new(Box::new(factory));
        loader.ensure_ready().await.unwrap();
        loader.ensure_ready().await.unwrap();
        loader.ensure_ready().await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_data_url_roundtrip() {
        let bytes = b"\x89PNG\r\n\x1a\n fake";
        let url = encode_png_data_url(bytes);
        assert!(url.starts_with(PNG_DATA_URL_PREFIX));
        assert_eq!(decode_data_url(&url).unwrap(), bytes);
    }

    #[test]
    fn test_decode_rejects_non_image_payloads() {
        assert!(decode_data_url("not-a-data-url").is_err());
        assert!(decode_data_url("data:text/plain;base64,aGk=").is_err());
        assert!(decode_data_url("data:image/png;base64,!!!").is_err());
    }

    #[test]
    fn test_default_options_serialize_camel_case() {
        let json = serde_json::to_value(RenderOptions::default()).unwrap();
        assert_eq!(json["symbology"], "code128");
        assert_eq!(json["displayValue"], false);
        assert_eq!(json["width"], 2);
        assert_eq!(json["height"], 100);
        assert_eq!(json["margin"], 10);
    }
}
