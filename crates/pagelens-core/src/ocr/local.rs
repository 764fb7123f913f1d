//! Local OCR engine using mistralrs

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use image::DynamicImage;
use mistralrs::{
    ChatCompletionChunkResponse, Delta, Model, RequestBuilder, Response, TextMessageRole,
    VisionModelBuilder,
};
use tokio::sync::mpsc;
use tracing::debug;

use super::{EngineLoader, OcrEngine, TimeoutEngine};
use crate::config::GenerationSettings;
use crate::device::Device;
use crate::models::{ModelManager, ModelVariant};

/// OCR checkpoint running in-process
pub struct LocalEngine {
    model: Arc<Model>,
    variant: ModelVariant,
    generation: GenerationSettings,
}

impl LocalEngine {
    /// Load a vision model from a local snapshot directory
    pub async fn load(
        model_dir: &Path,
        variant: ModelVariant,
        device: Device,
        generation: GenerationSettings,
    ) -> Result<Self> {
        let mut builder =
            VisionModelBuilder::new(model_dir.to_string_lossy().to_string()).with_logging();
        if device.is_cpu() {
            builder = builder.with_force_cpu();
        }

        let model = builder
            .build()
            .await
            .with_context(|| format!("Failed to load {} on {}", variant.repo_id(), device))?;

        Ok(Self {
            model: Arc::new(model),
            variant,
            generation,
        })
    }
}

#[async_trait]
impl OcrEngine for LocalEngine {
    async fn recognize(
        &self,
        image: &DynamicImage,
        stream: Option<mpsc::Sender<String>>,
    ) -> Result<String> {
        // The checkpoint is prompted with the page image alone
        let request = RequestBuilder::new()
            .add_image_message(TextMessageRole::User, "", vec![image.clone()], &self.model)?
            .set_sampler_temperature(self.generation.temperature)
            .set_sampler_topp(self.generation.top_p)
            .set_sampler_max_len(self.generation.max_new_tokens);

        let mut response = self.model.stream_chat_request(request).await?;
        let mut text = String::new();

        while let Some(chunk) = response.next().await {
            match chunk {
                Response::Chunk(ChatCompletionChunkResponse { choices, .. }) => {
                    if let Some(choice) = choices.first() {
                        let Delta { content, .. } = &choice.delta;
                        if let Some(delta) = content {
                            if !delta.is_empty() {
                                if let Some(tx) = &stream {
                                    let _ = tx.send(delta.clone()).await;
                                }
                                text.push_str(delta);
                            }
                        }
                    }
                }
                Response::Done(_) => {
                    debug!("Generation complete ({} chars)", text.len());
                    break;
                }
                Response::ModelError(msg, _) => {
                    return Err(anyhow::anyhow!("Model error: {}", msg));
                }
                _ => {}
            }
        }

        Ok(text)
    }

    fn variant(&self) -> ModelVariant {
        self.variant
    }
}

/// Downloads (on first use) and loads local engines
pub struct LocalEngineLoader {
    models_dir: PathBuf,
    generation: GenerationSettings,
    timeout: Option<std::time::Duration>,
}

impl LocalEngineLoader {
    pub fn new(
        models_dir: PathBuf,
        generation: GenerationSettings,
        timeout: Option<std::time::Duration>,
    ) -> Self {
        Self {
            models_dir,
            generation,
            timeout,
        }
    }
}

#[async_trait]
impl EngineLoader for LocalEngineLoader {
    async fn load(&self, variant: ModelVariant, device: Device) -> Result<Arc<dyn OcrEngine>> {
        let manager = ModelManager::new(self.models_dir.clone())?;
        let model_dir = manager.ensure_downloaded(variant).await?;

        tracing::info!(model = variant.repo_id(), %device, "Loading OCR model...");
        let engine: Arc<dyn OcrEngine> = Arc::new(
            LocalEngine::load(&model_dir, variant, device, self.generation.clone()).await?,
        );
        tracing::info!(model = variant.repo_id(), "OCR model loaded");

        Ok(match self.timeout {
            Some(limit) => Arc::new(TimeoutEngine::new(engine, limit)),
            None => engine,
        })
    }
}
