//! Credential resolution: pick the effective API key for a request.
//!
//! Priority, first non-blank wins:
//!
//! 1. the key the user supplied for this session
//! 2. the deployment key ([`deployment_credential`])
//!
//! so a user can override an operator-provisioned default per session
//! without touching shared configuration.

use crate::error::FieldScanError;
use std::fmt;

/// Environment variable holding the operator-provisioned key.
pub const DEPLOYMENT_KEY_ENV: &str = "FIELDSCAN_API_KEY";

/// Secondary environment variable, the conventional Gemini key name.
pub const GEMINI_KEY_ENV: &str = "GEMINI_API_KEY";

/// Key baked in at build time, if the build environment set one.
const BUILD_TIME_KEY: Option<&str> = option_env!("FIELDSCAN_API_KEY");

/// An effective, non-blank API key.
///
/// `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wrap a key, returning `None` when it is blank.
    pub fn new(key: impl AsRef<str>) -> Option<Self> {
        let key = key.as_ref().trim();
        if key.is_empty() {
            None
        } else {
            Some(Self(key.to_string()))
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential(<{} chars>)", self.0.len())
    }
}

/// Resolve the effective credential from the user key and a deployment key.
pub fn resolve_credential(
    user_supplied: Option<&str>,
    deployment: Option<&str>,
) -> Result<Credential, FieldScanError> {
    user_supplied
        .and_then(Credential::new)
        .or_else(|| deployment.and_then(Credential::new))
        .ok_or(FieldScanError::MissingCredential)
}

/// Deployment-level key: explicit configuration, then the process
/// environment (`FIELDSCAN_API_KEY`, `GEMINI_API_KEY`), then the build-time
/// `FIELDSCAN_API_KEY`. Blank values are skipped at every level.
pub fn deployment_credential(configured: Option<&str>) -> Option<String> {
    let from_env = |name: &str| std::env::var(name).ok();
    configured
        .map(str::to_string)
        .into_iter()
        .chain(from_env(DEPLOYMENT_KEY_ENV))
        .chain(from_env(GEMINI_KEY_ENV))
        .chain(BUILD_TIME_KEY.map(str::to_string))
        .find(|k| !k.trim().is_empty())
}
