use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::metadata::{HandlerRef, MetadataError, ParameterMetadataResolver};
use crate::processor::{decode_processor, encode_processor, ParameterBag, ProcessError};
use crate::registry::{HasherRegistry, RegistryError};

#[derive(Debug, Error, PartialEq)]
pub enum RoutingError {
    #[error("route `{0}` does not exist")]
    RouteNotFound(String),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("url generation failed: {0}")]
    Generation(String),
}

/// The host's URL-generation service. Externally owned; this crate only
/// decorates it.
pub trait UrlGenerator: Send + Sync {
    fn generate(&self, route: &str, parameters: ParameterBag) -> Result<String, RoutingError>;
}

/// Maps a route name to the handler that serves it.
pub trait RouteTable: Send + Sync {
    fn handler_for(&self, route: &str) -> Option<HandlerRef>;
}

/// Fixed route table built at startup.
#[derive(Default)]
pub struct StaticRouteTable {
    routes: HashMap<String, HandlerRef>,
}

impl StaticRouteTable {
    pub fn new() -> StaticRouteTable {
        StaticRouteTable::default()
    }

    pub fn insert(&mut self, route: impl Into<String>, handler: HandlerRef) {
        self.routes.insert(route.into(), handler);
    }
}

impl RouteTable for StaticRouteTable {
    fn handler_for(&self, route: &str) -> Option<HandlerRef> {
        self.routes.get(route).cloned()
    }
}

/// Egress decorator: encodes a route's declared parameters before handing
/// off to the wrapped generator.
///
/// Routes without a table entry (or without a spec) delegate unmodified, so
/// the wrapped service's behavior for unknown routes is preserved. No caching
/// happens here; the registry owns all of it.
pub struct ObfuscatedUrlGenerator<G> {
    inner: G,
    routes: Arc<dyn RouteTable>,
    resolver: Arc<ParameterMetadataResolver>,
    registry: Arc<HasherRegistry>,
}

impl<G: UrlGenerator> ObfuscatedUrlGenerator<G> {
    pub fn new(
        inner: G,
        routes: Arc<dyn RouteTable>,
        resolver: Arc<ParameterMetadataResolver>,
        registry: Arc<HasherRegistry>,
    ) -> ObfuscatedUrlGenerator<G> {
        ObfuscatedUrlGenerator {
            inner,
            routes,
            resolver,
            registry,
        }
    }
}

impl<G: UrlGenerator> UrlGenerator for ObfuscatedUrlGenerator<G> {
    fn generate(&self, route: &str, mut parameters: ParameterBag) -> Result<String, RoutingError> {
        if let Some(handler) = self.routes.handler_for(route) {
            let spec = self.resolver.resolve(&handler)?.map(|resolved| resolved.spec);
            let processor = encode_processor(&self.registry, spec.as_ref())?;
            processor
                .process(&mut parameters)
                .map_err(|err| RoutingError::Generation(err.to_string()))?;
        }
        self.inner.generate(route, parameters)
    }
}

/// What the dispatch pipeline should do after the interceptor ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngressDecision {
    /// Parameters decoded (or nothing was declared); invoke the handler.
    Proceed,
    /// A declared parameter did not decode. The request must be answered as
    /// an unmatched route (client-class), never as a server error.
    NoMatch { parameter: String },
}

/// Ingress interceptor: runs once per request, before handler invocation,
/// and decodes the matched handler's declared parameters in place.
///
/// This is the single enforcement point for the decode failure policy:
/// stale or attacker-supplied opaque strings are ordinary input, so they
/// surface as [`IngressDecision::NoMatch`], while broken handler wiring is a
/// genuine server fault and propagates as an error.
pub struct RequestIngressInterceptor {
    resolver: Arc<ParameterMetadataResolver>,
    registry: Arc<HasherRegistry>,
}

impl RequestIngressInterceptor {
    pub fn new(
        resolver: Arc<ParameterMetadataResolver>,
        registry: Arc<HasherRegistry>,
    ) -> RequestIngressInterceptor {
        RequestIngressInterceptor { resolver, registry }
    }

    pub fn intercept(
        &self,
        handler: &HandlerRef,
        parameters: &mut ParameterBag,
    ) -> Result<IngressDecision, RoutingError> {
        let spec = self.resolver.resolve(handler)?.map(|resolved| resolved.spec);
        let processor = decode_processor(&self.registry, spec.as_ref())?;
        match processor.process(parameters) {
            Ok(()) => Ok(IngressDecision::Proceed),
            Err(ProcessError::DecodingFailed { parameter, .. }) => {
                tracing::debug!(
                    handler = %handler,
                    parameter = %parameter,
                    "undecodable route parameter; treating the request as unmatched"
                );
                Ok(IngressDecision::NoMatch { parameter })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RawHasherConfig;
    use crate::metadata::{HashAttribute, MetadataMap};
    use serde_json::json;

    /// Test double for the host generator: renders route plus sorted params.
    struct FakeGenerator;

    impl UrlGenerator for FakeGenerator {
        fn generate(&self, route: &str, parameters: ParameterBag) -> Result<String, RoutingError> {
            if route == "missing_route" {
                return Err(RoutingError::RouteNotFound(route.to_string()));
            }
            let mut parts: Vec<String> = parameters
                .iter()
                .map(|(k, v)| match v {
                    serde_json::Value::String(s) => format!("{}={}", k, s),
                    other => format!("{}={}", k, other),
                })
                .collect();
            parts.sort();
            Ok(format!("/{}?{}", route, parts.join("&")))
        }
    }

    fn fixture() -> (
        ObfuscatedUrlGenerator<FakeGenerator>,
        RequestIngressInterceptor,
        Arc<HasherRegistry>,
        HandlerRef,
    ) {
        let registry = Arc::new(HasherRegistry::new());
        registry
            .register("secure", RawHasherConfig::new().with_salt("s3cure"))
            .unwrap();

        let handler = HandlerRef::parse("OrderController::show").unwrap();
        let metadata = MetadataMap::new();
        metadata.register_attribute(
            handler.clone(),
            HashAttribute::single("id").with_hasher("secure"),
        );
        let resolver = Arc::new(ParameterMetadataResolver::new(Arc::new(metadata)));

        let mut routes = StaticRouteTable::new();
        routes.insert("order_show", handler.clone());

        let generator = ObfuscatedUrlGenerator::new(
            FakeGenerator,
            Arc::new(routes),
            resolver.clone(),
            registry.clone(),
        );
        let interceptor = RequestIngressInterceptor::new(resolver, registry.clone());
        (generator, interceptor, registry, handler)
    }

    #[test]
    fn test_egress_encodes_declared_parameters() {
        let (generator, _, registry, _) = fixture();
        let url = generator
            .generate("order_show", bag(json!({"id": 123, "page": 2})))
            .unwrap();
        let opaque = registry.converter("secure").unwrap().encode(123);
        assert_eq!(url, format!("/order_show?id={}&page=2", opaque));
    }

    #[test]
    fn test_egress_delegates_unknown_routes_unmodified() {
        let (generator, _, _, _) = fixture();
        assert_eq!(
            generator.generate("missing_route", bag(json!({"id": 1}))),
            Err(RoutingError::RouteNotFound("missing_route".into()))
        );
    }

    #[test]
    fn test_ingress_decodes_in_place() {
        let (_, interceptor, registry, handler) = fixture();
        let opaque = registry.converter("secure").unwrap().encode(123);
        let mut params = bag(json!({"id": opaque, "page": "2"}));
        let decision = interceptor.intercept(&handler, &mut params).unwrap();
        assert_eq!(decision, IngressDecision::Proceed);
        assert_eq!(params["id"], json!(123));
        assert_eq!(params["page"], json!("2"));
    }

    #[test]
    fn test_ingress_decode_failure_is_a_no_match() {
        let (_, interceptor, _, handler) = fixture();
        let mut params = bag(json!({"id": "garbage-value"}));
        let decision = interceptor.intercept(&handler, &mut params).unwrap();
        assert_eq!(
            decision,
            IngressDecision::NoMatch {
                parameter: "id".into()
            }
        );
    }

    #[test]
    fn test_ingress_missing_handler_is_a_server_error() {
        let (_, interceptor, _, _) = fixture();
        let ghost = HandlerRef::parse("Ghost::action").unwrap();
        let mut params = bag(json!({}));
        assert!(matches!(
            interceptor.intercept(&ghost, &mut params),
            Err(RoutingError::Metadata(
                MetadataError::MissingHandlerReference(_)
            ))
        ));
    }

    fn bag(value: serde_json::Value) -> ParameterBag {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }
}
