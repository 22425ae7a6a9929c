use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Upper bound for `min_hash_length`.
pub const MAX_MIN_HASH_LENGTH: usize = 255;

/// Alphabet size bounds, counted in characters.
pub const MIN_ALPHABET_LENGTH: usize = 4;
pub const MAX_ALPHABET_LENGTH: usize = 256;

/// Alphabet used when a hasher does not configure one.
pub const DEFAULT_ALPHABET: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ1234567890";

const MAX_NAME_LENGTH: usize = 64;

static HASHER_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]{1,64}$").expect("Pattern should be valid"));

static ENV_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^%env\((?:(int|bool|float|string):)?([A-Za-z_][A-Za-z0-9_]*)\)%$")
        .expect("Pattern should be valid")
});

/// Error raised when a hasher configuration is rejected. Each variant names
/// the offending field.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("hasher name `{0}` is invalid (letters, digits, `_`, `-` and `.` only, at most {MAX_NAME_LENGTH} characters)")]
    InvalidName(String),
    #[error("salt must be a string, got {0}")]
    InvalidSalt(String),
    #[error("min_hash_length must be an integer in 0..={MAX_MIN_HASH_LENGTH}, got {0}")]
    InvalidMinHashLength(String),
    #[error("alphabet must be a string, got {0}")]
    InvalidAlphabet(String),
    #[error("alphabet must contain between {MIN_ALPHABET_LENGTH} and {MAX_ALPHABET_LENGTH} characters, got {0}")]
    AlphabetLength(usize),
    #[error("alphabet contains duplicate character `{0}`")]
    AlphabetDuplicate(char),
    #[error("enabled must be a boolean, got {0}")]
    InvalidEnabled(String),
}

/// Registration input for one hasher, before validation.
///
/// Fields are JSON-ish scalars rather than concrete types so that
/// `%env(TYPE:NAME)%` placeholder strings can stand in for integers and
/// booleans until they are resolved against the process environment.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawHasherConfig {
    pub salt: Option<Value>,
    pub min_hash_length: Option<Value>,
    pub alphabet: Option<Value>,
    pub enabled: Option<Value>,
}

impl RawHasherConfig {
    pub fn new() -> RawHasherConfig {
        RawHasherConfig::default()
    }

    pub fn with_salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = Some(Value::String(salt.into()));
        self
    }

    pub fn with_min_hash_length(mut self, length: u64) -> Self {
        self.min_hash_length = Some(Value::from(length));
        self
    }

    pub fn with_alphabet(mut self, alphabet: impl Into<String>) -> Self {
        self.alphabet = Some(Value::String(alphabet.into()));
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(Value::Bool(enabled));
        self
    }
}

/// One hasher's validated, immutable parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HasherConfig {
    name: String,
    salt: String,
    min_hash_length: usize,
    alphabet: String,
    enabled: bool,
}

impl HasherConfig {
    /// Validates `raw` (with defaults merged in for unset fields) into an
    /// immutable configuration, or fails naming the offending field.
    ///
    /// Validation is pure: `raw` is never mutated, values are never coerced.
    /// Placeholder strings that were left unresolved are treated as literals
    /// here; deferral happens in the registry, not in validation.
    pub fn from_raw(name: &str, raw: &RawHasherConfig) -> Result<HasherConfig, ConfigError> {
        validate_name(name)?;

        let salt = match &raw.salt {
            None => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => return Err(ConfigError::InvalidSalt(other.to_string())),
        };

        let min_hash_length = match &raw.min_hash_length {
            None => 0,
            Some(Value::Number(n)) => match n.as_u64() {
                Some(v) if v as usize <= MAX_MIN_HASH_LENGTH => v as usize,
                _ => return Err(ConfigError::InvalidMinHashLength(n.to_string())),
            },
            Some(other) => return Err(ConfigError::InvalidMinHashLength(other.to_string())),
        };

        let alphabet = match &raw.alphabet {
            None => DEFAULT_ALPHABET.to_string(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => return Err(ConfigError::InvalidAlphabet(other.to_string())),
        };
        validate_alphabet(&alphabet)?;

        let enabled = match &raw.enabled {
            None => true,
            Some(Value::Bool(b)) => *b,
            Some(other) => return Err(ConfigError::InvalidEnabled(other.to_string())),
        };

        Ok(HasherConfig {
            name: name.to_string(),
            salt,
            min_hash_length,
            alphabet,
            enabled,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn salt(&self) -> &str {
        &self.salt
    }

    pub fn min_hash_length(&self) -> usize {
        self.min_hash_length
    }

    pub fn alphabet(&self) -> &str {
        &self.alphabet
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }
}

pub(crate) fn validate_name(name: &str) -> Result<(), ConfigError> {
    if HASHER_NAME.is_match(name) {
        Ok(())
    } else {
        Err(ConfigError::InvalidName(name.to_string()))
    }
}

fn validate_alphabet(alphabet: &str) -> Result<(), ConfigError> {
    let count = alphabet.chars().count();
    if !(MIN_ALPHABET_LENGTH..=MAX_ALPHABET_LENGTH).contains(&count) {
        return Err(ConfigError::AlphabetLength(count));
    }
    let mut seen = HashSet::new();
    for c in alphabet.chars() {
        if !seen.insert(c) {
            return Err(ConfigError::AlphabetDuplicate(c));
        }
    }
    Ok(())
}

/// Resolves `%env(NAME)%` / `%env(TYPE:NAME)%` placeholders against the
/// process environment. Unset variables leave the literal placeholder in
/// place; those fields stay deferred and are re-resolved at first use.
pub(crate) fn resolve_placeholders(raw: &RawHasherConfig) -> RawHasherConfig {
    RawHasherConfig {
        salt: raw.salt.as_ref().map(resolve_value),
        min_hash_length: raw.min_hash_length.as_ref().map(resolve_value),
        alphabet: raw.alphabet.as_ref().map(resolve_value),
        enabled: raw.enabled.as_ref().map(resolve_value),
    }
}

/// True if any field still holds an unresolved placeholder.
pub(crate) fn has_pending_placeholder(raw: &RawHasherConfig) -> bool {
    [&raw.salt, &raw.min_hash_length, &raw.alphabet, &raw.enabled]
        .into_iter()
        .flatten()
        .any(is_placeholder)
}

/// Copy of `raw` with placeholder-bearing fields blanked out, so the
/// remaining fields can be validated eagerly at registration time.
pub(crate) fn mask_pending(raw: &RawHasherConfig) -> RawHasherConfig {
    let keep = |v: &Option<Value>| v.clone().filter(|v| !is_placeholder(v));
    RawHasherConfig {
        salt: keep(&raw.salt),
        min_hash_length: keep(&raw.min_hash_length),
        alphabet: keep(&raw.alphabet),
        enabled: keep(&raw.enabled),
    }
}

fn is_placeholder(value: &Value) -> bool {
    matches!(value, Value::String(s) if ENV_PLACEHOLDER.is_match(s))
}

fn resolve_value(value: &Value) -> Value {
    let Value::String(s) = value else {
        return value.clone();
    };
    let Some(caps) = ENV_PLACEHOLDER.captures(s) else {
        return value.clone();
    };
    let ty = caps.get(1).map(|m| m.as_str()).unwrap_or("string");
    let name = &caps[2];
    match std::env::var(name) {
        // Unset variable: keep the literal, validated lazily at first use.
        Err(_) => value.clone(),
        Ok(var) => coerce(ty, &var).unwrap_or(Value::String(var)),
    }
}

// A value that fails coercion is passed through as a string so validation
// can reject it with the field name attached.
fn coerce(ty: &str, var: &str) -> Option<Value> {
    match ty {
        "int" => var.parse::<i64>().ok().map(Value::from),
        "float" => var
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        "bool" => match var {
            "true" | "1" | "yes" | "on" => Some(Value::Bool(true)),
            "false" | "0" | "no" | "off" | "" => Some(Value::Bool(false)),
            _ => None,
        },
        _ => Some(Value::String(var.to_string())),
    }
}
