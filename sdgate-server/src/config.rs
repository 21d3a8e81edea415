use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;

use crate::auth::{AuthGuard, AuthMode, Credential};
use crate::gateway::{GenerationPolicy, DEFAULT_MAX_PROMPT_CHARS};
use crate::keep_warm::{KeepWarmConfig, DEFAULT_KEEP_WARM_PROMPT};
use crate::routes::{GENERATE_PATH, HEALTH_PATH};

// Define command line arguments
#[derive(Parser, Clone)]
#[command(author, version, about = "Authenticated text-to-image gateway with keep-warm probing")]
pub struct Config {
    /// Host address to bind the server to
    #[arg(long, env = "SDGATE_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to bind the server to
    #[arg(long, env = "SDGATE_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Model to serve
    #[arg(long, env = "SDGATE_MODEL", default_value = "black-forest-labs/FLUX.1-schnell")]
    pub model: String,

    /// Use CPU instead of GPU
    #[arg(long, env = "SDGATE_CPU")]
    pub cpu: bool,

    /// `authenticated` requires X-API-Key on generate, `open` does not
    #[arg(long, env = "SDGATE_AUTH_MODE", default_value_t = AuthMode::Authenticated)]
    pub auth_mode: AuthMode,

    /// Shared API key for authenticated mode
    #[arg(long, env = "API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Output width in pixels (model default when unset)
    #[arg(long, env = "SDGATE_WIDTH")]
    pub width: Option<usize>,

    /// Output height in pixels (model default when unset)
    #[arg(long, env = "SDGATE_HEIGHT")]
    pub height: Option<usize>,

    /// Fixed sampling seed
    #[arg(long, env = "SDGATE_SEED")]
    pub seed: Option<u64>,

    /// Longest accepted prompt, in characters
    #[arg(long, env = "SDGATE_MAX_PROMPT_CHARS", default_value_t = DEFAULT_MAX_PROMPT_CHARS)]
    pub max_prompt_chars: usize,

    /// Inference timeout in seconds, 0 disables it
    #[arg(long, env = "SDGATE_INFERENCE_TIMEOUT_SECS", default_value_t = 300)]
    pub inference_timeout_secs: u64,

    /// Run the keep-warm job alongside the server
    #[arg(long, env = "SDGATE_KEEP_WARM")]
    pub keep_warm: bool,

    /// Seconds between keep-warm ticks
    #[arg(
        long,
        env = "SDGATE_KEEP_WARM_INTERVAL_SECS",
        default_value_t = 300,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub keep_warm_interval_secs: u64,

    /// Health URL called by the keep-warm job (defaults to this server)
    #[arg(long, env = "KEEP_WARM_HEALTH_URL")]
    pub keep_warm_health_url: Option<String>,

    /// Generate URL called by the keep-warm job (defaults to this server)
    #[arg(long, env = "KEEP_WARM_GENERATE_URL")]
    pub keep_warm_generate_url: Option<String>,

    /// Prompt sent by the keep-warm job
    #[arg(long, env = "SDGATE_KEEP_WARM_PROMPT", default_value = DEFAULT_KEEP_WARM_PROMPT)]
    pub keep_warm_prompt: String,

    /// Per-request timeout of keep-warm requests, in seconds
    #[arg(long, env = "SDGATE_KEEP_WARM_TIMEOUT_SECS", default_value_t = 600)]
    pub keep_warm_timeout_secs: u64,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("model", &self.model)
            .field("cpu", &self.cpu)
            .field("auth_mode", &self.auth_mode)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("keep_warm", &self.keep_warm)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn credential(&self) -> Option<Credential> {
        self.api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .map(Credential::new)
    }

    /// Builds the guard for the configured mode. Authenticated mode without a
    /// key is a startup error.
    pub fn auth_guard(&self) -> Result<AuthGuard> {
        match self.auth_mode {
            AuthMode::Open => Ok(AuthGuard::open()),
            AuthMode::Authenticated => match self.credential() {
                Some(credential) => Ok(AuthGuard::authenticated(credential)),
                None => bail!("auth mode is `authenticated` but API_KEY is not set"),
            },
        }
    }

    pub fn generation_policy(&self) -> GenerationPolicy {
        GenerationPolicy {
            width: self.width,
            height: self.height,
            seed: self.seed,
            max_prompt_chars: self.max_prompt_chars,
            inference_timeout: match self.inference_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            ..GenerationPolicy::default()
        }
    }

    pub fn keep_warm_config(&self) -> KeepWarmConfig {
        let (local_health, local_generate) = local_keep_warm_urls(&self.host, self.port);
        let credential = match self.auth_mode {
            AuthMode::Authenticated => self.credential(),
            AuthMode::Open => None,
        };

        KeepWarmConfig {
            health_url: self.keep_warm_health_url.clone().unwrap_or(local_health),
            generate_url: self.keep_warm_generate_url.clone().unwrap_or(local_generate),
            credential,
            prompt: self.keep_warm_prompt.clone(),
            interval: Duration::from_secs(self.keep_warm_interval_secs),
            request_timeout: Duration::from_secs(self.keep_warm_timeout_secs),
        }
    }
}

/// Keep-warm URLs for a server listening on `host:port`. Wildcard binds are
/// reached through loopback.
pub fn local_keep_warm_urls(host: &str, port: u16) -> (String, String) {
    let host = match host {
        "0.0.0.0" => "127.0.0.1",
        "::" | "[::]" => "[::1]",
        other => other,
    };
    let base = format!("http://{host}:{port}");
    (format!("{base}{HEALTH_PATH}"), format!("{base}{GENERATE_PATH}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(std::iter::once("sdgate-server").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn defaults_to_authenticated_turbo_policy() {
        let config = parse(&["--api-key", "secret123"]);

        assert_eq!(config.auth_mode, AuthMode::Authenticated);
        assert_eq!(config.bind_address(), "127.0.0.1:8000");
        let policy = config.generation_policy();
        assert_eq!(policy.steps, 1);
        assert_eq!(policy.guidance, 0.0);
        assert_eq!(policy.inference_timeout, Some(Duration::from_secs(300)));
        assert_eq!(config.auth_guard().unwrap().mode(), AuthMode::Authenticated);
    }

    #[test]
    fn authenticated_mode_requires_a_key() {
        let config = parse(&["--auth-mode", "authenticated"]);
        assert!(config.auth_guard().is_err());

        let config = parse(&["--auth-mode", "authenticated", "--api-key", ""]);
        assert!(config.auth_guard().is_err());
    }

    #[test]
    fn open_mode_ignores_the_key() {
        let config = parse(&["--auth-mode", "open", "--api-key", "secret123"]);

        assert_eq!(config.auth_guard().unwrap().mode(), AuthMode::Open);
        assert!(config.keep_warm_config().credential.is_none());
    }

    #[test]
    fn zero_timeout_disables_it() {
        let config = parse(&["--inference-timeout-secs", "0"]);
        assert_eq!(config.generation_policy().inference_timeout, None);
    }

    #[test]
    fn keep_warm_targets_this_server_by_default() {
        let config = parse(&["--host", "0.0.0.0", "--port", "9000", "--api-key", "k"]);
        let keep_warm = config.keep_warm_config();

        assert_eq!(keep_warm.health_url, "http://127.0.0.1:9000/health");
        assert_eq!(keep_warm.generate_url, "http://127.0.0.1:9000/generate");
        assert_eq!(keep_warm.credential, Some(Credential::new("k")));
        assert_eq!(keep_warm.interval, Duration::from_secs(300));
    }

    #[test]
    fn keep_warm_urls_can_point_elsewhere() {
        let config = parse(&[
            "--keep-warm-health-url",
            "https://edge.example/health",
            "--keep-warm-generate-url",
            "https://edge.example/generate",
        ]);
        let keep_warm = config.keep_warm_config();

        assert_eq!(keep_warm.health_url, "https://edge.example/health");
        assert_eq!(keep_warm.generate_url, "https://edge.example/generate");
    }

    #[test]
    fn keep_warm_interval_must_be_positive() {
        let result = Config::try_parse_from(["sdgate-server", "--keep-warm-interval-secs", "0"]);
        assert!(result.is_err());
    }

    #[test]
    fn debug_output_hides_the_key() {
        let config = parse(&["--api-key", "secret123"]);
        assert!(!format!("{config:?}").contains("secret123"));
    }
}
