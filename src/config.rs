//! Configuration module for cloudwatcher.
//!
//! AWS settings are resolved from explicit values first, falling back to
//! environment variables looked up through an [`EnvLookup`].

use std::collections::HashMap;
use std::env;
use std::fmt;

/// Region used when neither an explicit value nor the environment provides one.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Source of environment variables.
pub trait EnvLookup {
    fn var(&self, key: &str) -> Option<String>;
}

/// Reads the real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvLookup for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }
}

impl EnvLookup for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Resolved AWS connection settings.
#[derive(Clone, PartialEq, Eq)]
pub struct AwsSettings {
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    /// Overrides `https://{service}.{region}.amazonaws.com` for every service.
    pub endpoint_url: Option<String>,
}

impl Default for AwsSettings {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            endpoint_url: None,
        }
    }
}

impl fmt::Debug for AwsSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsSettings")
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &self.secret_access_key.as_ref().map(|_| "***"))
            .field("session_token", &self.session_token.as_ref().map(|_| "***"))
            .field("endpoint_url", &self.endpoint_url)
            .finish()
    }
}

/// Builder for [`AwsSettings`].
///
/// Every unset field falls back to the environment when [`resolve`] runs:
/// - `AWS_ACCESS_KEY_ID`
/// - `AWS_SECRET_ACCESS_KEY`
/// - `AWS_SESSION_TOKEN`
/// - `AWS_DEFAULT_REGION`, then `AWS_REGION` (default: "us-east-1")
/// - `CLOUDWATCHER_ENDPOINT_URL`
///
/// Empty strings count as unset.
///
/// [`resolve`]: AwsSettingsBuilder::resolve
#[derive(Debug, Clone, Default)]
pub struct AwsSettingsBuilder {
    region: Option<String>,
    access_key_id: Option<String>,
    secret_access_key: Option<String>,
    session_token: Option<String>,
    endpoint_url: Option<String>,
}

impl AwsSettingsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn region(mut self, region: Option<String>) -> Self {
        self.region = region;
        self
    }

    pub fn access_key_id(mut self, value: Option<String>) -> Self {
        self.access_key_id = value;
        self
    }

    pub fn secret_access_key(mut self, value: Option<String>) -> Self {
        self.secret_access_key = value;
        self
    }

    pub fn session_token(mut self, value: Option<String>) -> Self {
        self.session_token = value;
        self
    }

    pub fn endpoint_url(mut self, value: Option<String>) -> Self {
        self.endpoint_url = value;
        self
    }

    /// Fill the missing fields from `env`.
    pub fn resolve(self, env: &dyn EnvLookup) -> AwsSettings {
        let lookup = |key: &str| non_empty(env.var(key));

        AwsSettings {
            region: non_empty(self.region)
                .or_else(|| lookup("AWS_DEFAULT_REGION"))
                .or_else(|| lookup("AWS_REGION"))
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            access_key_id: non_empty(self.access_key_id).or_else(|| lookup("AWS_ACCESS_KEY_ID")),
            secret_access_key: non_empty(self.secret_access_key)
                .or_else(|| lookup("AWS_SECRET_ACCESS_KEY")),
            session_token: non_empty(self.session_token).or_else(|| lookup("AWS_SESSION_TOKEN")),
            endpoint_url: non_empty(self.endpoint_url)
                .or_else(|| lookup("CLOUDWATCHER_ENDPOINT_URL")),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
