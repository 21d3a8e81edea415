use anyhow::{anyhow, Result};
use hf_hub::api::tokio::Api;
use tracing::info;

use crate::{DeviceMap, FluxLoader, FluxVariant, Loader, ModelLike};
use std::sync::Arc;

/// Model families recognised from a model name.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModelType {
    Flux,
    T5,
    Clip,
}

impl ModelType {
    /// Detect model type from model name
    pub fn from_name(model_name: &str) -> Option<Self> {
        let name_upper = model_name.to_uppercase();

        if name_upper.contains("FLUX") {
            Some(ModelType::Flux)
        } else if name_upper.contains("T5") {
            Some(ModelType::T5)
        } else if name_upper.contains("CLIP") {
            Some(ModelType::Clip)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelVariant {
    Flux(FluxVariant),
}

impl ModelVariant {
    /// Detect model variant from model name
    pub fn from_name(model_name: &str) -> Option<Self> {
        let name_upper = model_name.to_uppercase();

        if name_upper.contains("FLUX") {
            Some(ModelVariant::Flux(if name_upper.contains("DEV") {
                FluxVariant::Dev
            } else {
                FluxVariant::Schnell
            }))
        } else {
            None
        }
    }
}

/// Load a model based on its name, automatically detecting the appropriate loader.
pub async fn load_model(
    model_name: &str,
    api: Api,
    device_map: DeviceMap,
) -> Result<Arc<dyn ModelLike>> {
    let model_type = ModelType::from_name(model_name)
        .ok_or_else(|| anyhow!("Unsupported model type: {}", model_name))?;

    match model_type {
        ModelType::Flux => {
            let ModelVariant::Flux(variant) = ModelVariant::from_name(model_name)
                .ok_or_else(|| anyhow!("Unsupported model variant: {}", model_name))?;
            info!(model = model_name, ?model_type, %variant, "loading model");
            let model = FluxLoader::load(variant, api, device_map).await?;
            Ok(Arc::new(model))
        }
        ModelType::T5 | ModelType::Clip => Err(anyhow!(
            "Model type {:?} is a text encoder, not an image generator: {}",
            model_type,
            model_name
        )),
    }
}
