use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::codec::Converter;
use crate::metadata::ParameterSpec;
use crate::registry::{HasherRegistry, RegistryError};

/// Mutable route-parameter bag, name to value.
pub type ParameterBag = serde_json::Map<String, Value>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProcessError {
    /// A declared parameter carried a string that does not decode under the
    /// declared hasher. At ingress this means "no matching route", not a
    /// server fault.
    #[error("parameter `{parameter}` does not decode under hasher `{hasher}`")]
    DecodingFailed { parameter: String, hasher: String },
}

/// Applies a transform to a parameter bag in place.
///
/// Call sites never branch on whether a handler declared anything; they ask
/// for a processor and invoke it. Handlers without a spec get the no-op.
pub trait ParametersProcessor: Send + Sync {
    fn process(&self, parameters: &mut ParameterBag) -> Result<(), ProcessError>;
}

/// Processor for handlers with no declared obfuscation.
pub struct NoOpParametersProcessor;

impl ParametersProcessor for NoOpParametersProcessor {
    fn process(&self, _parameters: &mut ParameterBag) -> Result<(), ProcessError> {
        Ok(())
    }
}

/// Replaces declared integer parameters with opaque strings (egress).
pub struct EncodeParametersProcessor {
    converter: Arc<Converter>,
    spec: ParameterSpec,
}

impl EncodeParametersProcessor {
    pub fn new(
        registry: &HasherRegistry,
        spec: ParameterSpec,
    ) -> Result<EncodeParametersProcessor, RegistryError> {
        let converter = registry.converter(spec.hasher())?;
        Ok(EncodeParametersProcessor { converter, spec })
    }
}

impl ParametersProcessor for EncodeParametersProcessor {
    fn process(&self, parameters: &mut ParameterBag) -> Result<(), ProcessError> {
        for name in self.spec.parameters() {
            let Some(value) = parameters.get_mut(name) else {
                continue;
            };
            // Undeclared types pass through untouched.
            if let Some(num) = integer_value(value) {
                *value = Value::String(self.converter.encode(num));
            }
        }
        Ok(())
    }
}

/// Replaces declared opaque strings with their integers (ingress).
pub struct DecodeParametersProcessor {
    converter: Arc<Converter>,
    spec: ParameterSpec,
}

impl DecodeParametersProcessor {
    pub fn new(
        registry: &HasherRegistry,
        spec: ParameterSpec,
    ) -> Result<DecodeParametersProcessor, RegistryError> {
        let converter = registry.converter(spec.hasher())?;
        Ok(DecodeParametersProcessor { converter, spec })
    }
}

impl ParametersProcessor for DecodeParametersProcessor {
    fn process(&self, parameters: &mut ParameterBag) -> Result<(), ProcessError> {
        for name in self.spec.parameters() {
            let Some(value) = parameters.get_mut(name) else {
                continue;
            };
            let Value::String(encoded) = &*value else {
                continue;
            };
            match self.converter.decode(encoded) {
                Ok(num) => *value = Value::Number(num.into()),
                Err(err) => {
                    tracing::debug!(parameter = %name, error = %err, "route parameter failed to decode");
                    return Err(ProcessError::DecodingFailed {
                        parameter: name.clone(),
                        hasher: self.spec.hasher().to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Builds the egress processor for a resolved spec, or the no-op when the
/// handler declared nothing.
pub fn encode_processor(
    registry: &HasherRegistry,
    spec: Option<&ParameterSpec>,
) -> Result<Box<dyn ParametersProcessor>, RegistryError> {
    match spec {
        None => Ok(Box::new(NoOpParametersProcessor)),
        Some(spec) => Ok(Box::new(EncodeParametersProcessor::new(
            registry,
            spec.clone(),
        )?)),
    }
}

/// Builds the ingress processor for a resolved spec, or the no-op.
pub fn decode_processor(
    registry: &HasherRegistry,
    spec: Option<&ParameterSpec>,
) -> Result<Box<dyn ParametersProcessor>, RegistryError> {
    match spec {
        None => Ok(Box::new(NoOpParametersProcessor)),
        Some(spec) => Ok(Box::new(DecodeParametersProcessor::new(
            registry,
            spec.clone(),
        )?)),
    }
}

// Integers and all-digit strings count as integer-like; everything else is
// left alone.
fn integer_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => {
            s.parse().ok()
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RawHasherConfig;
    use crate::metadata::{HandlerRef, HashAttribute, MetadataMap, ParameterMetadataResolver};
    use serde_json::json;

    fn registry() -> HasherRegistry {
        let registry = HasherRegistry::new();
        registry
            .register(
                "secure",
                RawHasherConfig::new()
                    .with_salt("very-secret")
                    .with_min_hash_length(25),
            )
            .unwrap();
        registry
    }

    fn spec(parameters: &[&str], hasher: &str) -> ParameterSpec {
        // Round-trip a structured declaration to get a ParameterSpec.
        let map = MetadataMap::new();
        let handler = HandlerRef::parse("C::m").unwrap();
        map.register_attribute(
            handler.clone(),
            HashAttribute::new(parameters.iter().copied()).with_hasher(hasher),
        );
        ParameterMetadataResolver::new(Arc::new(map))
            .resolve(&handler)
            .unwrap()
            .unwrap()
            .spec
    }

    fn bag(value: serde_json::Value) -> ParameterBag {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_encode_replaces_declared_integers_only() {
        let registry = registry();
        let spec = spec(&["id", "userId"], "secure");
        let mut params = bag(json!({"id": 7, "userId": 9, "page": 2}));
        encode_processor(&registry, Some(&spec))
            .unwrap()
            .process(&mut params)
            .unwrap();

        let converter = registry.converter("secure").unwrap();
        assert_eq!(params["id"], json!(converter.encode(7)));
        assert_eq!(params["userId"], json!(converter.encode(9)));
        assert_eq!(params["page"], json!(2));
    }

    #[test]
    fn test_encode_accepts_integer_like_strings() {
        let registry = registry();
        let spec = spec(&["id"], "secure");
        let mut params = bag(json!({"id": "7"}));
        encode_processor(&registry, Some(&spec))
            .unwrap()
            .process(&mut params)
            .unwrap();
        assert_eq!(
            params["id"],
            json!(registry.converter("secure").unwrap().encode(7))
        );
    }

    #[test]
    fn test_encode_passes_non_integers_through() {
        let registry = registry();
        let spec = spec(&["id"], "secure");
        let mut params = bag(json!({"id": "seven", "other": true}));
        encode_processor(&registry, Some(&spec))
            .unwrap()
            .process(&mut params)
            .unwrap();
        assert_eq!(params["id"], json!("seven"));
        assert_eq!(params["other"], json!(true));
    }

    #[test]
    fn test_decode_restores_integers() {
        let registry = registry();
        let spec = spec(&["id", "userId"], "secure");
        let converter = registry.converter("secure").unwrap();
        let mut params = bag(json!({
            "id": converter.encode(7),
            "userId": converter.encode(9),
            "page": "2",
        }));
        decode_processor(&registry, Some(&spec))
            .unwrap()
            .process(&mut params)
            .unwrap();
        assert_eq!(params["id"], json!(7));
        assert_eq!(params["userId"], json!(9));
        // Never declared, stays an untouched string.
        assert_eq!(params["page"], json!("2"));
    }

    #[test]
    fn test_decode_failure_names_the_parameter() {
        let registry = registry();
        let spec = spec(&["id"], "secure");
        let mut params = bag(json!({"id": "not-an-opaque-string"}));
        let err = decode_processor(&registry, Some(&spec))
            .unwrap()
            .process(&mut params)
            .unwrap_err();
        assert_eq!(
            err,
            ProcessError::DecodingFailed {
                parameter: "id".into(),
                hasher: "secure".into(),
            }
        );
    }

    #[test]
    fn test_noop_for_missing_spec() {
        let registry = registry();
        let mut params = bag(json!({"id": 7}));
        encode_processor(&registry, None)
            .unwrap()
            .process(&mut params)
            .unwrap();
        decode_processor(&registry, None)
            .unwrap()
            .process(&mut params)
            .unwrap();
        assert_eq!(params["id"], json!(7));
    }

    #[test]
    fn test_unknown_hasher_is_fatal_at_construction() {
        let registry = HasherRegistry::new();
        let spec = spec(&["id"], "missing");
        assert!(matches!(
            encode_processor(&registry, Some(&spec)),
            Err(RegistryError::HasherNotFound { .. })
        ));
    }
}
