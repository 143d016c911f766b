use extractor_core::{Error, Result};
use std::collections::HashMap;

pub const ENV_SELECTOR: &str = "QBO_ENV";
pub const REALM_ID: &str = "QBO_REALM_ID";
pub const CLIENT_ID: &str = "QBO_CLIENT_ID";
pub const CLIENT_SECRET: &str = "QBO_CLIENT_SECRET";
pub const REFRESH_TOKEN: &str = "QBO_REFRESH_TOKEN";

/// Read-only lookup of named secrets.
pub trait SecretStore: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
}

/// Secrets from the process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSecrets;

impl SecretStore for EnvSecrets {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Fixed in-memory secrets.
#[derive(Debug, Default, Clone)]
pub struct StaticSecrets {
    values: HashMap<String, String>,
}

impl StaticSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }
}

impl SecretStore for StaticSecrets {
    fn get(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for StaticSecrets {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Trimmed value, with blanks treated as absent.
pub fn lookup(store: &dyn SecretStore, name: &str) -> Option<String> {
    store
        .get(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn require(store: &dyn SecretStore, name: &str) -> Result<String> {
    lookup(store, name).ok_or_else(|| Error::Config(format!("missing secret {}", name)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiEnvironment {
    Sandbox,
    Production,
}

impl ApiEnvironment {
    /// `sandbox` in any case selects the sandbox; anything else is production.
    pub fn from_selector(selector: Option<&str>) -> Self {
        match selector {
            Some(s) if s.trim().eq_ignore_ascii_case("sandbox") => ApiEnvironment::Sandbox,
            _ => ApiEnvironment::Production,
        }
    }
}

/// OAuth client material for the refresh-token grant.
#[derive(Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

impl ClientCredentials {
    pub fn load(store: &dyn SecretStore) -> Result<Self> {
        Ok(Self {
            client_id: require(store, CLIENT_ID)?,
            client_secret: require(store, CLIENT_SECRET)?,
            refresh_token: require(store, REFRESH_TOKEN)?,
        })
    }
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Everything a run needs from the secret store, checked up front so a
/// missing value fails before any request goes out.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub environment: ApiEnvironment,
    pub realm_id: String,
    pub client: ClientCredentials,
}

impl Credentials {
    pub fn load(store: &dyn SecretStore) -> Result<Self> {
        let environment = ApiEnvironment::from_selector(lookup(store, ENV_SELECTOR).as_deref());
        let realm_id = require(store, REALM_ID)?;
        let client = ClientCredentials::load(store)?;

        Ok(Self {
            environment,
            realm_id,
            client,
        })
    }
}
