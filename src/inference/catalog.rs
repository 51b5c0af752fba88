//! External tool catalog: the model-facing view of the registry.
//!
//! Model APIs only accept function names matching `[A-Za-z0-9_-]+`, so each
//! fully-qualified `provider::tool` name is sanitized into an external id and
//! a reverse mapping is kept to route calls back. The mapping is rebuilt on
//! every catalog build and is injective: colliding ids get `_2`, `_3`, …
//! suffixes in a deterministic order.

use std::collections::{HashMap, HashSet};

use crate::mcp_client::{ToolDescriptor, ToolHost};

use super::types::{FunctionDefinition, ToolDefinition};

/// Providers that are never exposed to the model unless configured otherwise.
pub const DEFAULT_EXCLUDED_PROVIDERS: &[&str] = &["filesystem"];

/// One model-invokable tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalToolSpec {
    pub external_name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A built catalog: the specs sent to the model plus the reverse name map.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    specs: Vec<ExternalToolSpec>,
    by_external: HashMap<String, String>,
}

impl ToolCatalog {
    /// The specs, in catalog order.
    pub fn specs(&self) -> &[ExternalToolSpec] {
        &self.specs
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Map an external id back to its fully-qualified name.
    pub fn resolve(&self, external_name: &str) -> Option<&str> {
        self.by_external.get(external_name).map(|s| s.as_str())
    }

    /// The catalog in OpenAI `tools` request format.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.specs
            .iter()
            .map(|spec| ToolDefinition {
                r#type: "function".to_string(),
                function: FunctionDefinition {
                    name: spec.external_name.clone(),
                    description: spec.description.clone(),
                    parameters: spec.input_schema.clone(),
                },
            })
            .collect()
    }
}

/// Build the catalog from the live registry.
pub async fn build_external_tool_catalog<F>(host: &dyn ToolHost, exclude: F) -> ToolCatalog
where
    F: Fn(&ToolDescriptor) -> bool,
{
    catalog_from_descriptors(host.list_all_tools().await, exclude)
}

/// Build the catalog from an already-fetched descriptor list.
///
/// Descriptors are expected in registry order (providers by id, tools in
/// declared order); collision suffixes follow that order.
pub fn catalog_from_descriptors<F>(descriptors: Vec<ToolDescriptor>, exclude: F) -> ToolCatalog
where
    F: Fn(&ToolDescriptor) -> bool,
{
    let mut catalog = ToolCatalog::default();
    let mut taken: HashSet<String> = HashSet::new();

    for tool in descriptors.into_iter().filter(|t| !exclude(t)) {
        let base = sanitize_tool_name(&tool.fully_qualified_name);
        let external_name = disambiguate(&base, &taken);
        if external_name != base {
            tracing::warn!(
                tool = %tool.fully_qualified_name,
                sanitized = %base,
                assigned = %external_name,
                "external tool name collision, suffix assigned"
            );
        }
        taken.insert(external_name.clone());

        let description = tool
            .description
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| format!("{} from {}", tool.tool_name, tool.provider_id));

        catalog
            .by_external
            .insert(external_name.clone(), tool.fully_qualified_name);
        catalog.specs.push(ExternalToolSpec {
            external_name,
            description,
            input_schema: normalize_schema(tool.input_schema),
        });
    }

    catalog
}

/// Exclusion predicate for a list of provider ids.
pub fn exclude_providers(providers: Vec<String>) -> impl Fn(&ToolDescriptor) -> bool {
    move |tool| providers.iter().any(|p| *p == tool.provider_id)
}

/// Replace characters outside `[A-Za-z0-9_-]` with `_`, collapse runs of `_`,
/// and trim leading and trailing `_`.
pub fn sanitize_tool_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        let ch = if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
            ch
        } else {
            '_'
        };
        if ch == '_' && out.ends_with('_') {
            continue;
        }
        out.push(ch);
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "tool".to_string()
    } else {
        trimmed.to_string()
    }
}

fn disambiguate(base: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{base}_{n}"))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| base.to_string())
}

/// Tools without a usable schema get an empty object schema.
fn normalize_schema(schema: serde_json::Value) -> serde_json::Value {
    if schema.is_object() {
        schema
    } else {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": [],
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
