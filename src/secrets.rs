//! Secret lookup for provider API keys.
//!
//! Source configurations never carry credentials themselves; they name a
//! secret via `api_key_name` and the registry resolves it through a
//! [`SecretStore`] when the configuration is loaded.

use std::collections::HashMap;

/// A read-only view of named secrets.
pub trait SecretStore: Send + Sync {
    /// Returns the secret value, or `None` if it is not set.
    fn get(&self, name: &str) -> Option<String>;
}

/// A fixed set of secrets, typically the `[secrets]` table of the config
/// file, falling back to the environment for names it does not hold.
#[derive(Debug, Default, Clone)]
pub struct StaticSecrets {
    values: HashMap<String, String>,
    env_fallback: bool,
}

impl StaticSecrets {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self {
            values,
            env_fallback: false,
        }
    }

    /// Consult the process environment for names not in the table.
    pub fn with_env_fallback(mut self) -> Self {
        self.env_fallback = true;
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }
}

impl SecretStore for StaticSecrets {
    fn get(&self, name: &str) -> Option<String> {
        match self.values.get(name) {
            Some(v) => Some(v.clone()),
            None if self.env_fallback => std::env::var(name).ok(),
            None => None,
        }
    }
}

/// Resolve a secret, treating an empty or whitespace-only value as absent.
pub fn resolve_non_empty(store: &dyn SecretStore, name: &str) -> Option<String> {
    store
        .get(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Expand `${VAR_NAME}` patterns in a string from the process environment.
///
/// Unset variables expand to the empty string. Expanded values are copied
/// as-is, never scanned again.
pub fn expand_env_vars(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start + 2..].find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let name = &rest[start + 2..start + 2 + len];
        out.push_str(&std::env::var(name).unwrap_or_default());
        rest = &rest[start + 3 + len..];
    }
    out.push_str(rest);
    out
}
