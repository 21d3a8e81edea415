use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use sdgate_core::{encode_jpeg, GenerationRequest, ModelLike, JPEG_MEDIA_TYPE};
use tracing::{debug, info, warn};

use crate::auth::{AuthDecision, AuthGuard, AuthMode};
use crate::error::GatewayError;
use crate::health::HealthStatus;

/// Turbo sampling policy: a single step with guidance disabled.
pub const TURBO_STEPS: usize = 1;
pub const TURBO_GUIDANCE: f64 = 0.0;

pub const DEFAULT_MAX_PROMPT_CHARS: usize = 2000;
pub const DEFAULT_INFERENCE_TIMEOUT: Duration = Duration::from_secs(300);

/// Server-side generation policy. Requests cannot override any of it.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationPolicy {
    pub steps: usize,
    pub guidance: f64,
    pub width: Option<usize>,
    pub height: Option<usize>,
    pub seed: Option<u64>,
    pub max_prompt_chars: usize,
    pub inference_timeout: Option<Duration>,
}

impl Default for GenerationPolicy {
    fn default() -> Self {
        Self {
            steps: TURBO_STEPS,
            guidance: TURBO_GUIDANCE,
            width: None,
            height: None,
            seed: None,
            max_prompt_chars: DEFAULT_MAX_PROMPT_CHARS,
            inference_timeout: Some(DEFAULT_INFERENCE_TIMEOUT),
        }
    }
}

impl GenerationPolicy {
    fn request_for(&self, prompt: &str) -> GenerationRequest {
        GenerationRequest {
            width: self.width,
            height: self.height,
            seed: self.seed,
            ..GenerationRequest::new(prompt, self.steps, self.guidance)
        }
    }
}

/// Encoded image returned by `generate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    pub bytes: Vec<u8>,
    pub media_type: &'static str,
}

pub struct InferenceGateway {
    auth: AuthGuard,
    model: Arc<dyn ModelLike>,
    policy: GenerationPolicy,
}

impl InferenceGateway {
    pub fn new(auth: AuthGuard, model: Arc<dyn ModelLike>, policy: GenerationPolicy) -> Self {
        Self {
            auth,
            model,
            policy,
        }
    }

    pub fn auth_mode(&self) -> AuthMode {
        self.auth.mode()
    }

    pub fn policy(&self) -> &GenerationPolicy {
        &self.policy
    }

    pub fn health(&self) -> HealthStatus {
        HealthStatus::healthy_now()
    }

    pub async fn generate(
        &self,
        prompt: Option<&str>,
        credential: Option<&str>,
    ) -> Result<GenerationResult, GatewayError> {
        let prompt = self.validate_prompt(prompt)?;

        if self.auth.authorize(credential) == AuthDecision::Denied {
            warn!(
                credential_present = credential.is_some(),
                "rejected generate request"
            );
            return Err(GatewayError::Unauthorized);
        }

        let request = self.policy.request_for(prompt);
        debug!(prompt = %request.prompt, steps = request.steps, guidance = request.guidance, "running inference");

        let started = Instant::now();
        let model = Arc::clone(&self.model);
        let task = tokio::task::spawn_blocking(move || {
            let image = model.run(&request)?;
            encode_jpeg(&image)
        });

        let joined = match self.policy.inference_timeout {
            Some(limit) => tokio::time::timeout(limit, task)
                .await
                .map_err(|_| GatewayError::InferenceTimeout(limit))?,
            None => task.await,
        };
        let bytes = joined
            .map_err(|e| GatewayError::InferenceFailure(anyhow!("inference worker failed: {e}")))?
            .map_err(GatewayError::InferenceFailure)?;

        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            bytes = bytes.len(),
            "generated image"
        );
        Ok(GenerationResult {
            bytes,
            media_type: JPEG_MEDIA_TYPE,
        })
    }

    fn validate_prompt<'a>(&self, prompt: Option<&'a str>) -> Result<&'a str, GatewayError> {
        let prompt = prompt
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| GatewayError::InvalidArgument("prompt is required".to_string()))?;

        let chars = prompt.chars().count();
        if chars > self.policy.max_prompt_chars {
            return Err(GatewayError::InvalidArgument(format!(
                "prompt is {chars} characters, limit is {}",
                self.policy.max_prompt_chars
            )));
        }
        Ok(prompt)
    }
}
