use std::fmt;

use serde::{Deserialize, Serialize};

/// Request header carrying the shared API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Whether `generate` requires the shared API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Demo deployments: anyone may generate.
    Open,
    #[default]
    Authenticated,
}

serde_plain::derive_display_from_serialize!(AuthMode);
serde_plain::derive_fromstr_from_deserialize!(AuthMode);

/// Shared secret provisioned out-of-band. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    Allowed,
    Denied,
}

#[derive(Debug, Clone)]
pub struct AuthGuard {
    credential: Option<Credential>,
}

impl AuthGuard {
    /// Guard that admits every request.
    pub fn open() -> Self {
        Self { credential: None }
    }

    pub fn authenticated(credential: Credential) -> Self {
        Self {
            credential: Some(credential),
        }
    }

    pub fn mode(&self) -> AuthMode {
        match self.credential {
            Some(_) => AuthMode::Authenticated,
            None => AuthMode::Open,
        }
    }

    pub fn authorize(&self, supplied: Option<&str>) -> AuthDecision {
        match (&self.credential, supplied) {
            (None, _) => AuthDecision::Allowed,
            (Some(expected), Some(supplied)) if expected.expose() == supplied => {
                AuthDecision::Allowed
            }
            (Some(_), _) => AuthDecision::Denied,
        }
    }
}
