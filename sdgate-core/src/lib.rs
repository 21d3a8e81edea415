pub mod device_map;
pub mod loader;
mod loader_factory;
mod util;

mod flux;

pub use device_map::*;
pub use flux::{FluxLoader, FluxModel, FluxVariant};
use image::DynamicImage;
pub use loader::*;
pub use loader_factory::*;
use serde::{Deserialize, Serialize};
pub use util::{encode_jpeg, lock_unpoisoned, JPEG_MEDIA_TYPE};
pub(crate) use util::*;

/// A single text-to-image request as seen by a model.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, PartialOrd)]
pub struct GenerationRequest {
    pub prompt: String,
    pub steps: usize,
    pub guidance: f64,
    pub width: Option<usize>,
    pub height: Option<usize>,
    pub seed: Option<u64>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, steps: usize, guidance: f64) -> Self {
        Self {
            prompt: prompt.into(),
            steps,
            guidance,
            width: None,
            height: None,
            seed: None,
        }
    }
}

/// The inference capability: anything that turns a prompt into an image.
///
/// Implementations are shared across concurrent requests and are expected to
/// serialize access to their own mutable state.
pub trait ModelLike: Send + Sync {
    fn run(&self, request: &GenerationRequest) -> anyhow::Result<DynamicImage>;
}
