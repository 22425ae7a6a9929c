use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::codec::Converter;
use crate::config::{
    has_pending_placeholder, mask_pending, resolve_placeholders, validate_name, ConfigError,
    HasherConfig, RawHasherConfig,
};

/// The hasher that always exists, even on an otherwise empty registry.
pub const DEFAULT_HASHER: &str = "default";

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("unknown hasher `{name}`; known hashers: {known:?}")]
    HasherNotFound { name: String, known: Vec<String> },
}

/// Owns the named hasher configurations and lazily builds their converters.
///
/// Two distinct maps: raw configurations (written at registration) and built
/// converters (a memoization cache, invalidated per name on re-registration).
/// Registration happens once at startup; `converter` is the read-heavy path
/// and is safe under concurrent readers. If two first-uses race, both build
/// the same deterministic converter and one copy is thrown away.
pub struct HasherRegistry {
    configs: RwLock<HashMap<String, RawHasherConfig>>,
    converters: RwLock<HashMap<String, Arc<Converter>>>,
}

impl HasherRegistry {
    /// Creates a registry with the `"default"` hasher pre-registered.
    pub fn new() -> HasherRegistry {
        let registry = HasherRegistry {
            configs: RwLock::new(HashMap::new()),
            converters: RwLock::new(HashMap::new()),
        };
        registry
            .register(DEFAULT_HASHER, RawHasherConfig::default())
            .expect("Default hasher configuration should be valid");
        registry
    }

    /// Registers (or replaces) a named hasher configuration.
    ///
    /// Environment placeholders are resolved here; fields whose variable is
    /// unset keep the literal and are re-resolved and validated at first use.
    /// Everything else is validated eagerly, so a broken deployment fails at
    /// startup rather than on the first request. Any cached converter for
    /// `name` is invalidated.
    pub fn register(&self, name: &str, raw: RawHasherConfig) -> Result<(), RegistryError> {
        validate_name(name)?;
        let resolved = resolve_placeholders(&raw);
        if has_pending_placeholder(&resolved) {
            // Fail fast on the fields we can already see; the pending ones
            // bypass validation until first use.
            HasherConfig::from_raw(name, &mask_pending(&resolved))?;
        } else {
            HasherConfig::from_raw(name, &resolved)?;
        }
        self.configs.write().insert(name.to_string(), resolved);
        self.converters.write().remove(name);
        Ok(())
    }

    /// Returns the converter for `name`, building and caching it on first use.
    pub fn converter(&self, name: &str) -> Result<Arc<Converter>, RegistryError> {
        if let Some(converter) = self.converters.read().get(name) {
            return Ok(converter.clone());
        }

        let raw = {
            let configs = self.configs.read();
            match configs.get(name) {
                Some(raw) => raw.clone(),
                None => {
                    let mut known: Vec<String> = configs.keys().cloned().collect();
                    known.sort();
                    return Err(RegistryError::HasherNotFound {
                        name: name.to_string(),
                        known,
                    });
                }
            }
        };

        // Second resolution pass: deferred placeholders pick up variables set
        // after registration, or fall back to their literals and validate.
        let resolved = resolve_placeholders(&raw);
        let config = HasherConfig::from_raw(name, &resolved)?;
        if config.enabled() && config.salt().is_empty() {
            tracing::warn!(
                hasher = name,
                "hasher has an empty salt; encoded parameters are trivially enumerable"
            );
        }
        let converter = Arc::new(Converter::new(&config));
        let converter = self
            .converters
            .write()
            .entry(name.to_string())
            .or_insert(converter)
            .clone();
        Ok(converter)
    }

    /// Registered hasher names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.configs.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.configs.read().contains_key(name)
    }
}

impl Default for HasherRegistry {
    fn default() -> HasherRegistry {
        HasherRegistry::new()
    }
}
