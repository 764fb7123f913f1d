//! OCR invocation: the engine seam, the local mistralrs engine, and bbox
//! post-processing.

pub mod bbox;
mod local;

pub use local::{LocalEngine, LocalEngineLoader};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use image::DynamicImage;
use tokio::sync::mpsc;

use crate::device::Device;
use crate::jobs::OcrMode;
use crate::models::ModelVariant;

/// A loaded OCR model.
///
/// Implementations generate Markdown for one page image. When `stream` is
/// given, text chunks are sent as they are generated; the returned string is
/// always the complete output.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(
        &self,
        image: &DynamicImage,
        stream: Option<mpsc::Sender<String>>,
    ) -> Result<String>;

    fn variant(&self) -> ModelVariant;
}

/// Produces engines for a model variant on a device
#[async_trait]
pub trait EngineLoader: Send + Sync {
    async fn load(&self, variant: ModelVariant, device: Device) -> Result<Arc<dyn OcrEngine>>;
}

/// Wraps an engine so a single invocation fails instead of hanging forever.
///
/// On timeout the inner future is dropped and the caller's engine lease is
/// released with the error. A backend that generates on its own thread (as
/// mistralrs does) may still finish the abandoned request, so it can briefly
/// overlap the next call.
pub struct TimeoutEngine {
    inner: Arc<dyn OcrEngine>,
    limit: Duration,
}

impl TimeoutEngine {
    pub fn new(inner: Arc<dyn OcrEngine>, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

#[async_trait]
impl OcrEngine for TimeoutEngine {
    async fn recognize(
        &self,
        image: &DynamicImage,
        stream: Option<mpsc::Sender<String>>,
    ) -> Result<String> {
        tokio::time::timeout(self.limit, self.inner.recognize(image, stream))
            .await
            .map_err(|_| anyhow::anyhow!("OCR timed out after {}s", self.limit.as_secs()))?
    }

    fn variant(&self) -> ModelVariant {
        self.inner.variant()
    }
}

/// Result of recognising one page
#[derive(Debug, Clone, Default)]
pub struct PageOutput {
    /// Final Markdown
    pub text: String,
    /// Cropped region images written for this page
    pub images: Vec<PathBuf>,
}

/// Run OCR on one page image.
///
/// In text+bbox mode the coordinates are stripped, regions are cropped into
/// `out_dir` as `<prefix>image_<n>.png`, and references are rewritten.
pub async fn recognize_page(
    engine: &dyn OcrEngine,
    image: &DynamicImage,
    mode: OcrMode,
    out_dir: &Path,
    prefix: &str,
    stream: Option<mpsc::Sender<String>>,
) -> Result<PageOutput> {
    let raw = engine.recognize(image, stream).await?;

    if !mode.variant().emits_bboxes() {
        return Ok(PageOutput {
            text: raw,
            images: Vec::new(),
        });
    }

    let (clean, boxes) = bbox::parse_bbox_output(&raw);
    tracing::debug!("Found {} image regions", boxes.len());

    let (mapping, images) = bbox::crop_regions(image, &boxes, out_dir, prefix)?;
    Ok(PageOutput {
        text: bbox::rewrite_refs(&clean, &mapping),
        images,
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Scripted engine that records how many calls overlap
    pub struct StubEngine {
        pub variant: ModelVariant,
        pub output: String,
        pub delay: Duration,
        /// 1-based call number that returns an error
        pub fail_on: Option<usize>,
        pub calls: AtomicUsize,
        pub in_flight: AtomicUsize,
        pub max_in_flight: AtomicUsize,
    }

    impl StubEngine {
        pub fn new(variant: ModelVariant, output: &str) -> Self {
            Self {
                variant,
                output: output.to_string(),
                delay: Duration::ZERO,
                fail_on: None,
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn failing_on(mut self, call: usize) -> Self {
            self.fail_on = Some(call);
            self
        }
    }

    #[async_trait]
    impl OcrEngine for StubEngine {
        async fn recognize(
            &self,
            _image: &DynamicImage,
            stream: Option<mpsc::Sender<String>>,
        ) -> Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if let Some(tx) = stream {
                for word in self.output.split_inclusive(' ') {
                    let _ = tx.send(word.to_string()).await;
                }
            }

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.fail_on == Some(call) {
                anyhow::bail!("model crashed on call {}", call);
            }
            Ok(self.output.clone())
        }

        fn variant(&self) -> ModelVariant {
            self.variant
        }
    }

    /// Loader handing out one shared stub engine and counting loads
    pub struct StubLoader {
        pub engine: Arc<StubEngine>,
        pub loads: Mutex<Vec<(ModelVariant, Device)>>,
    }

    impl StubLoader {
        pub fn new(engine: StubEngine) -> Self {
            Self {
                engine: Arc::new(engine),
                loads: Mutex::new(Vec::new()),
            }
        }

        pub fn load_count(&self) -> usize {
            self.loads.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl EngineLoader for StubLoader {
        async fn load(&self, variant: ModelVariant, device: Device) -> Result<Arc<dyn OcrEngine>> {
            self.loads.lock().unwrap().push((variant, device));
            Ok(self.engine.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::StubEngine;
    use super::*;
    use image::{Rgb, RgbImage};

    fn page() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(100, 100, Rgb([0, 0, 255])))
    }

    #[tokio::test]
    async fn test_text_only_returns_raw_output() {
        let temp_dir = tempfile::tempdir().unwrap();
        let engine = StubEngine::new(ModelVariant::TextOnly, "# Hello ![image](a.png)1,2,3,4");

        let output = recognize_page(&engine, &page(), OcrMode::Text, temp_dir.path(), "x_", None)
            .await
            .unwrap();
        assert_eq!(output.text, "# Hello ![image](a.png)1,2,3,4");
        assert!(output.images.is_empty());
    }

    #[tokio::test]
    async fn test_bbox_mode_crops_and_rewrites() {
        let temp_dir = tempfile::tempdir().unwrap();
        let engine = StubEngine::new(
            ModelVariant::TextImage,
            "Intro\n![image](image_1.png)0,0,500,500\nOutro",
        );

        let output = recognize_page(
            &engine,
            &page(),
            OcrMode::TextImage,
            temp_dir.path(),
            "scan_",
            None,
        )
        .await
        .unwrap();

        assert_eq!(output.text, "Intro\n![image](scan_image_1.png)\nOutro");
        assert_eq!(output.images, vec![temp_dir.path().join("scan_image_1.png")]);
        assert!(output.images[0].exists());
    }

    #[tokio::test]
    async fn test_streamed_chunks_concatenate_to_output() {
        let temp_dir = tempfile::tempdir().unwrap();
        let engine = StubEngine::new(ModelVariant::TextOnly, "one two three");
        let (tx, mut rx) = mpsc::channel(16);

        let output = recognize_page(&engine, &page(), OcrMode::Text, temp_dir.path(), "", Some(tx))
            .await
            .unwrap();

        let mut streamed = String::new();
        while let Some(chunk) = rx.recv().await {
            streamed.push_str(&chunk);
        }
        assert_eq!(streamed, output.text);
    }

    #[tokio::test]
    async fn test_timeout_engine_fails_slow_call() {
        let slow = Arc::new(
            StubEngine::new(ModelVariant::TextOnly, "late").with_delay(Duration::from_millis(200)),
        );
        let engine = TimeoutEngine::new(slow, Duration::from_millis(20));

        let err = engine.recognize(&page(), None).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
