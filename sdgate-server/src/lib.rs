pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod health;
pub mod keep_warm;
pub mod logging;
pub mod routes;

pub use auth::{AuthDecision, AuthGuard, AuthMode, Credential, API_KEY_HEADER};
pub use config::Config;
pub use error::GatewayError;
pub use gateway::{GenerationPolicy, GenerationResult, InferenceGateway};
pub use health::{HealthState, HealthStatus};
pub use keep_warm::{KeepWarmConfig, KeepWarmJob, CheckFailure, TickReport};
pub use routes::router;
