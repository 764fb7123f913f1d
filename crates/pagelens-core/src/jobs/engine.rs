//! The single shared OCR engine.

use std::ops::Deref;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::sync::{Mutex, MutexGuard};

use crate::device::Device;
use crate::models::ModelVariant;
use crate::ocr::{EngineLoader, OcrEngine};

struct LoadedEngine {
    variant: ModelVariant,
    device: Device,
    engine: Arc<dyn OcrEngine>,
}

/// Owns the loaded model and serialises access to it.
///
/// Every model invocation holds an [`EngineLease`], so at most one runs at a
/// time no matter how many batches or front ends share the slot. Switching
/// variant or device drops the old model before loading the new one.
pub struct EngineSlot {
    loader: Arc<dyn EngineLoader>,
    current: Mutex<Option<LoadedEngine>>,
}

/// Exclusive access to the loaded engine until dropped
pub struct EngineLease<'a> {
    _guard: MutexGuard<'a, Option<LoadedEngine>>,
    engine: Arc<dyn OcrEngine>,
}

impl Deref for EngineLease<'_> {
    type Target = dyn OcrEngine;

    fn deref(&self) -> &Self::Target {
        self.engine.as_ref()
    }
}

impl EngineSlot {
    pub fn new(loader: Arc<dyn EngineLoader>) -> Self {
        Self {
            loader,
            current: Mutex::new(None),
        }
    }

    /// Wait for exclusive use of the engine, loading it if needed.
    pub async fn acquire(&self, variant: ModelVariant, device: Device) -> Result<EngineLease<'_>> {
        let mut guard = self.current.lock().await;

        let reusable = matches!(
            &*guard,
            Some(loaded) if loaded.variant == variant && loaded.device == device
        );
        if !reusable {
            if let Some(old) = guard.take() {
                tracing::info!(
                    from = old.variant.repo_id(),
                    to = variant.repo_id(),
                    "Switching OCR model"
                );
            }
            let engine = self.loader.load(variant, device).await?;
            *guard = Some(LoadedEngine {
                variant,
                device,
                engine,
            });
        }

        let engine = guard
            .as_ref()
            .map(|loaded| loaded.engine.clone())
            .ok_or_else(|| anyhow!("OCR engine is not loaded"))?;

        Ok(EngineLease {
            _guard: guard,
            engine,
        })
    }

    /// Load the model ahead of the first page so load errors surface early.
    pub async fn preload(&self, variant: ModelVariant, device: Device) -> Result<()> {
        self.acquire(variant, device).await.map(|_| ())
    }

    /// Currently loaded variant and device, if any
    pub async fn loaded(&self) -> Option<(ModelVariant, Device)> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|loaded| (loaded.variant, loaded.device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::test_support::{StubEngine, StubLoader};

    #[tokio::test]
    async fn test_engine_is_cached_per_variant_and_device() {
        let loader = Arc::new(StubLoader::new(StubEngine::new(ModelVariant::TextOnly, "x")));
        let slot = EngineSlot::new(loader.clone());
        assert!(slot.loaded().await.is_none());

        slot.preload(ModelVariant::TextOnly, Device::Cpu).await.unwrap();
        slot.preload(ModelVariant::TextOnly, Device::Cpu).await.unwrap();
        assert_eq!(loader.load_count(), 1);

        slot.preload(ModelVariant::TextImage, Device::Cpu).await.unwrap();
        assert_eq!(loader.load_count(), 2);
        assert_eq!(
            slot.loaded().await,
            Some((ModelVariant::TextImage, Device::Cpu))
        );
    }

    #[tokio::test]
    async fn test_leases_are_exclusive() {
        let loader = Arc::new(StubLoader::new(StubEngine::new(ModelVariant::TextOnly, "x")));
        let slot = EngineSlot::new(loader);

        let lease = slot.acquire(ModelVariant::TextOnly, Device::Cpu).await.unwrap();
        let waiting = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            slot.acquire(ModelVariant::TextOnly, Device::Cpu),
        )
        .await;
        assert!(waiting.is_err(), "second lease must wait for the first");

        drop(lease);
        assert!(slot.acquire(ModelVariant::TextOnly, Device::Cpu).await.is_ok());
    }
}
