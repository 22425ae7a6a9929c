use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use thiserror::Error;

use crate::config::validate_name;
use crate::registry::DEFAULT_HASHER;

/// Hard caps on declaration input. Breaching one is treated as adversarial
/// and logged as a security-relevant event before the declaration is dropped.
pub const MAX_DECLARED_PARAMETERS: usize = 16;
pub const MAX_DIRECTIVE_LENGTH: usize = 512;
pub const MAX_DOC_TEXT_LENGTH: usize = 8192;

static METHOD_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,63}$").expect("Pattern should be valid"));

// Anchored grammar for the legacy doc directive. Either one quoted name or a
// brace-delimited list, with an optional hasher designator:
//   @Hash("id")
//   @Hash({"id", "userId"}, hasher = "secure")
static HASH_DIRECTIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^@Hash\(\s*(?:"(?P<single>[A-Za-z0-9_]{1,64})"|\{(?P<list>[^{}]*)\})\s*(?:,\s*hasher\s*=\s*"(?P<hasher>[A-Za-z0-9_.-]{1,64})"\s*)?\)$"#,
    )
    .expect("Pattern should be valid")
});

static QUOTED_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^"([A-Za-z0-9_]{1,64})"$"#).expect("Pattern should be valid"));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetadataError {
    #[error("handler reference `{0}` is malformed")]
    InvalidHandlerReference(String),
    #[error("handler `{0}` does not exist")]
    MissingHandlerReference(String),
}

/// A route handler identity: controller plus method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerRef {
    controller: String,
    method: String,
}

impl HandlerRef {
    pub fn new(controller: &str, method: &str) -> Result<HandlerRef, MetadataError> {
        if controller.is_empty()
            || controller.len() > 256
            || controller.chars().any(char::is_whitespace)
            || !METHOD_NAME.is_match(method)
        {
            return Err(MetadataError::InvalidHandlerReference(format!(
                "{}::{}",
                controller, method
            )));
        }
        Ok(HandlerRef {
            controller: controller.to_string(),
            method: method.to_string(),
        })
    }

    /// Parses a `"Controller::method"` reference.
    pub fn parse(reference: &str) -> Result<HandlerRef, MetadataError> {
        let (controller, method) = reference
            .rsplit_once("::")
            .ok_or_else(|| MetadataError::InvalidHandlerReference(reference.to_string()))?;
        HandlerRef::new(controller, method)
    }

    pub fn controller(&self) -> &str {
        &self.controller
    }

    pub fn method(&self) -> &str {
        &self.method
    }
}

impl fmt::Display for HandlerRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}::{}", self.controller, self.method)
    }
}

/// The modern structured declaration attached to a handler method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashAttribute {
    pub parameters: Vec<String>,
    pub hasher: String,
}

impl HashAttribute {
    pub fn new<I, S>(parameters: I) -> HashAttribute
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        HashAttribute {
            parameters: parameters.into_iter().map(Into::into).collect(),
            hasher: DEFAULT_HASHER.to_string(),
        }
    }

    pub fn single(parameter: &str) -> HashAttribute {
        HashAttribute::new([parameter])
    }

    pub fn with_hasher(mut self, hasher: &str) -> HashAttribute {
        self.hasher = hasher.to_string();
        self
    }
}

/// Which parameters of a handler are obfuscated, and under which hasher.
/// Both declaration syntaxes normalize into this; nothing downstream ever
/// branches on where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSpec {
    parameters: Vec<String>,
    hasher: String,
}

impl ParameterSpec {
    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    pub fn hasher(&self) -> &str {
        &self.hasher
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclarationForm {
    Structured,
    LegacyDirective,
}

/// Outcome of a successful resolution, including which syntax produced it
/// and whether a shadowed legacy directive coexists on the same method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMetadata {
    pub spec: ParameterSpec,
    pub form: DeclarationForm,
    pub legacy_also_declared: bool,
}

/// The host framework's reflection boundary: what we can learn about a
/// handler method without owning the dispatch pipeline.
pub trait HandlerMetadataSource: Send + Sync {
    fn exists(&self, handler: &HandlerRef) -> bool;
    fn hash_attribute(&self, handler: &HandlerRef) -> Option<HashAttribute>;
    fn doc_text(&self, handler: &HandlerRef) -> Option<String>;
}

/// In-memory metadata source, populated at startup from the route table.
#[derive(Default)]
pub struct MetadataMap {
    known: RwLock<HashSet<HandlerRef>>,
    attributes: RwLock<HashMap<HandlerRef, HashAttribute>>,
    docs: RwLock<HashMap<HandlerRef, String>>,
}

impl MetadataMap {
    pub fn new() -> MetadataMap {
        MetadataMap::default()
    }

    /// Marks a handler as existing without any declaration.
    pub fn register_handler(&self, handler: HandlerRef) {
        self.known.write().insert(handler);
    }

    pub fn register_attribute(&self, handler: HandlerRef, attribute: HashAttribute) {
        self.known.write().insert(handler.clone());
        self.attributes.write().insert(handler, attribute);
    }

    pub fn register_doc(&self, handler: HandlerRef, doc: impl Into<String>) {
        self.known.write().insert(handler.clone());
        self.docs.write().insert(handler, doc.into());
    }
}

impl HandlerMetadataSource for MetadataMap {
    fn exists(&self, handler: &HandlerRef) -> bool {
        self.known.read().contains(handler)
    }

    fn hash_attribute(&self, handler: &HandlerRef) -> Option<HashAttribute> {
        self.attributes.read().get(handler).cloned()
    }

    fn doc_text(&self, handler: &HandlerRef) -> Option<String> {
        self.docs.read().get(handler).cloned()
    }
}

/// Resolves a handler's declared obfuscation metadata.
///
/// The structured attribute wins outright; the legacy `@Hash` doc directive
/// is the fallback and emits a deprecation notice on every successful match
/// unless this instance was built with deprecation reporting suppressed.
/// Resolutions are cached per handler.
pub struct ParameterMetadataResolver {
    source: Arc<dyn HandlerMetadataSource>,
    report_deprecations: bool,
    cache: RwLock<HashMap<HandlerRef, Option<ResolvedMetadata>>>,
}

impl ParameterMetadataResolver {
    pub fn new(source: Arc<dyn HandlerMetadataSource>) -> ParameterMetadataResolver {
        ParameterMetadataResolver {
            source,
            report_deprecations: true,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Disables deprecation notices for this instance only. There is no
    /// process-global toggle.
    pub fn suppress_deprecations(mut self) -> ParameterMetadataResolver {
        self.report_deprecations = false;
        self
    }

    /// Returns `None` when the handler declares no obfuscation. Fails only
    /// for broken handler wiring, never for malformed declarations (those
    /// are logged and dropped).
    pub fn resolve(
        &self,
        handler: &HandlerRef,
    ) -> Result<Option<ResolvedMetadata>, MetadataError> {
        if let Some(cached) = self.cache.read().get(handler) {
            return Ok(cached.clone());
        }
        if !self.source.exists(handler) {
            return Err(MetadataError::MissingHandlerReference(handler.to_string()));
        }
        let resolved = self.resolve_uncached(handler);
        self.cache.write().insert(handler.clone(), resolved.clone());
        Ok(resolved)
    }

    fn resolve_uncached(&self, handler: &HandlerRef) -> Option<ResolvedMetadata> {
        let doc = self.source.doc_text(handler);
        let legacy_present = doc.as_deref().map(has_directive).unwrap_or(false);

        if let Some(attribute) = self.source.hash_attribute(handler) {
            if legacy_present {
                tracing::info!(
                    handler = %handler,
                    "handler declares both a Hash attribute and a legacy @Hash directive; using the attribute"
                );
            }
            // An invalid structured declaration is dropped entirely; it does
            // not fall back to the shadowed legacy form.
            let spec = sanitize(attribute.parameters, &attribute.hasher, handler)?;
            return Some(ResolvedMetadata {
                spec,
                form: DeclarationForm::Structured,
                legacy_also_declared: legacy_present,
            });
        }

        let spec = parse_directive(&doc?, handler)?;
        if self.report_deprecations {
            tracing::warn!(
                handler = %handler,
                "the @Hash doc directive is deprecated; declare a Hash attribute on the method instead"
            );
        }
        Some(ResolvedMetadata {
            spec,
            form: DeclarationForm::LegacyDirective,
            legacy_also_declared: false,
        })
    }
}

// Doc lines may carry a docblock continuation marker.
fn normalize_line(line: &str) -> &str {
    let line = line.trim();
    line.strip_prefix('*').map(str::trim).unwrap_or(line)
}

fn has_directive(doc: &str) -> bool {
    doc.lines()
        .any(|line| normalize_line(line).starts_with("@Hash"))
}

/// Parses the first `@Hash` directive in `doc`. Anything that fails the
/// anchored grammar or the size guards invalidates the declaration as a
/// whole: obfuscation silently not applying is recoverable, a half-parsed
/// declaration is not.
fn parse_directive(doc: &str, handler: &HandlerRef) -> Option<ParameterSpec> {
    if doc.len() > MAX_DOC_TEXT_LENGTH {
        tracing::warn!(
            handler = %handler,
            length = doc.len(),
            limit = MAX_DOC_TEXT_LENGTH,
            "doc text exceeds the size guard; dropping declaration (possible adversarial input)"
        );
        return None;
    }
    for line in doc.lines() {
        let line = normalize_line(line);
        if !line.starts_with("@Hash") {
            continue;
        }
        if line.len() > MAX_DIRECTIVE_LENGTH {
            tracing::warn!(
                handler = %handler,
                length = line.len(),
                limit = MAX_DIRECTIVE_LENGTH,
                "@Hash directive exceeds the size guard; dropping declaration (possible adversarial input)"
            );
            return None;
        }
        let Some(caps) = HASH_DIRECTIVE.captures(line) else {
            tracing::warn!(handler = %handler, directive = line, "malformed @Hash directive ignored");
            return None;
        };

        let names: Vec<String> = if let Some(single) = caps.name("single") {
            vec![single.as_str().to_string()]
        } else {
            let list = caps.name("list").map(|m| m.as_str()).unwrap_or("");
            let mut names = Vec::new();
            for item in list.split(',') {
                let Some(name) = QUOTED_NAME.captures(item.trim()) else {
                    tracing::warn!(handler = %handler, item = item.trim(), "invalid parameter name in @Hash directive; declaration ignored");
                    return None;
                };
                names.push(name[1].to_string());
            }
            names
        };
        let hasher = caps
            .name("hasher")
            .map(|m| m.as_str())
            .unwrap_or(DEFAULT_HASHER);
        return sanitize(names, hasher, handler);
    }
    None
}

/// Shared checks for both declaration forms: character rules, the list size
/// guard, order-preserving deduplication.
fn sanitize(names: Vec<String>, hasher: &str, handler: &HandlerRef) -> Option<ParameterSpec> {
    if names.len() > MAX_DECLARED_PARAMETERS {
        tracing::warn!(
            handler = %handler,
            count = names.len(),
            limit = MAX_DECLARED_PARAMETERS,
            "declaration exceeds the parameter count guard; dropping it (possible adversarial input)"
        );
        return None;
    }
    let mut parameters = Vec::new();
    let mut seen = HashSet::new();
    for name in names {
        if name.is_empty() || name.len() > 64 || !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
            tracing::warn!(handler = %handler, parameter = %name, "invalid parameter name in declaration; declaration ignored");
            return None;
        }
        if seen.insert(name.clone()) {
            parameters.push(name);
        }
    }
    if parameters.is_empty() {
        return None;
    }
    if validate_name(hasher).is_err() {
        tracing::warn!(handler = %handler, hasher, "invalid hasher name in declaration; declaration ignored");
        return None;
    }
    Some(ParameterSpec {
        parameters,
        hasher: hasher.to_string(),
    })
}
