//! `routecloak` transparently obfuscates integer route parameters, so that
//! `/order/123` becomes `/order/4w9aA11avM` while controllers keep working
//! with plain integers.
//!
//! Sequential database IDs in URLs are trivially enumerable. This crate makes
//! them opaque at the two routing boundaries: parameters are encoded when a
//! URL is generated (egress) and decoded back before the handler runs
//! (ingress). The transform is a salted, reversible permutation over a
//! configurable alphabet. It is deliberately not encryption: the goal is to
//! stop casual enumeration, not a determined adversary holding the salt.
//!
//! Named hasher configurations live in a [`HasherRegistry`]; which parameters
//! a handler obfuscates is declared per method, either with the structured
//! [`HashAttribute`] or the deprecated `@Hash(...)` doc directive, and
//! resolved by [`ParameterMetadataResolver`].
//!
//! # Usage
//!
//! ## Full pipeline
//!
//! ```
//! use std::sync::Arc;
//! use routecloak::{
//!     HandlerRef, HashAttribute, HasherRegistry, IngressDecision, MetadataMap,
//!     ParameterBag, ParameterMetadataResolver, RawHasherConfig,
//!     RequestIngressInterceptor,
//! };
//! use serde_json::json;
//!
//! let registry = Arc::new(HasherRegistry::new());
//! registry
//!     .register("default", RawHasherConfig::new().with_salt("app-secret"))
//!     .unwrap();
//!
//! let metadata = MetadataMap::new();
//! let show = HandlerRef::parse("OrderController::show").unwrap();
//! metadata.register_attribute(show.clone(), HashAttribute::single("id"));
//! let resolver = Arc::new(ParameterMetadataResolver::new(Arc::new(metadata)));
//!
//! let interceptor = RequestIngressInterceptor::new(resolver, registry.clone());
//!
//! // An incoming request carries the opaque string; the handler sees 123.
//! let opaque = registry.converter("default").unwrap().encode(123);
//! let mut params = ParameterBag::new();
//! params.insert("id".into(), opaque.into());
//! let decision = interceptor.intercept(&show, &mut params).unwrap();
//! assert_eq!(decision, IngressDecision::Proceed);
//! assert_eq!(params["id"], json!(123));
//! ```
//!
//! ## Low level API
//!
//! [`Converter`] provides the bare encode/decode pair for one configuration.
//!
//! ```
//! use routecloak::{HasherRegistry, RawHasherConfig};
//!
//! let registry = HasherRegistry::new();
//! registry
//!     .register(
//!         "order",
//!         RawHasherConfig::new()
//!             .with_salt("your-secure-salt")
//!             .with_min_hash_length(10),
//!     )
//!     .unwrap();
//! let converter = registry.converter("order").unwrap();
//! let encoded = converter.encode(12345);
//! assert!(encoded.len() >= 10);
//! assert_eq!(converter.decode(&encoded).unwrap(), 12345);
//! ```

mod codec;
mod config;
mod metadata;
mod processor;
mod registry;
mod routing;

pub use codec::{Converter, DecodeError};
pub use config::{
    ConfigError, HasherConfig, RawHasherConfig, DEFAULT_ALPHABET, MAX_ALPHABET_LENGTH,
    MAX_MIN_HASH_LENGTH, MIN_ALPHABET_LENGTH,
};
pub use metadata::{
    DeclarationForm, HandlerMetadataSource, HandlerRef, HashAttribute, MetadataError, MetadataMap,
    ParameterMetadataResolver, ParameterSpec, ResolvedMetadata, MAX_DECLARED_PARAMETERS,
    MAX_DIRECTIVE_LENGTH, MAX_DOC_TEXT_LENGTH,
};
pub use processor::{
    decode_processor, encode_processor, DecodeParametersProcessor, EncodeParametersProcessor,
    NoOpParametersProcessor, ParameterBag, ParametersProcessor, ProcessError,
};
pub use registry::{HasherRegistry, RegistryError, DEFAULT_HASHER};
pub use routing::{
    IngressDecision, ObfuscatedUrlGenerator, RequestIngressInterceptor, RouteTable, RoutingError,
    StaticRouteTable, UrlGenerator,
};
