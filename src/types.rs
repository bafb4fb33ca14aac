//! Core types for field schemas, discriminants and resolved requests.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name of the property that enumerates resources.
pub const RESOURCE_FIELD: &str = "resource";

/// Name of the properties that enumerate operations per resource.
pub const OPERATION_FIELD: &str = "operation";

/// Raw user-supplied values keyed by field id.
pub type RawInputs = Map<String, Value>;

/// Returns the JSON type name for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Kind of an editable field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Number,
    Boolean,
    #[serde(alias = "options")]
    Enum,
    /// Free-form JSON text, parsed during resolution.
    Json,
    /// Hosts mutually exclusive variants; has no direct value.
    Group,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Number => "number",
            FieldKind::Boolean => "boolean",
            FieldKind::Enum => "enum",
            FieldKind::Json => "json",
            FieldKind::Group => "group",
        }
    }
}

/// HTTP method of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Parse a method name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Some(HttpMethod::Get),
            "POST" => Some(HttpMethod::Post),
            "PUT" => Some(HttpMethod::Put),
            "PATCH" => Some(HttpMethod::Patch),
            "DELETE" => Some(HttpMethod::Delete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// How a complex query value is written into the query string.
///
/// The remote API decides which one applies; scalars are always sent as is
/// except under [`QueryEncoding::Json`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryEncoding {
    /// Arrays and objects as JSON text, scalars as primitives.
    #[default]
    Auto,
    /// Everything as JSON text.
    Json,
    /// Arrays of scalars joined with commas.
    Comma,
}

/// A selectable choice of an enum field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionItem {
    pub label: String,
    pub value: Value,
}

/// Numeric and string constraints checked before resolution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Constraints {
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub min_length: Option<u64>,
    pub max_length: Option<u64>,
    pub pattern: Option<String>,
}

impl Constraints {
    pub fn is_empty(&self) -> bool {
        *self == Constraints::default()
    }
}

/// Current discriminant path: resource, operation and variant selections.
///
/// Selections map a selector field id (a variant group, or any field other
/// fields are shown for) to its chosen value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discriminant {
    pub resource: String,
    pub operation: String,
    #[serde(default)]
    pub selections: BTreeMap<String, Value>,
}

impl Discriminant {
    pub fn new(resource: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            operation: operation.into(),
            selections: BTreeMap::new(),
        }
    }

    /// Choose `value` for the selector field `field`.
    pub fn select(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.selections.insert(field.into(), value.into());
        self
    }

    pub fn selection(&self, field: &str) -> Option<&Value> {
        self.selections.get(field)
    }
}

/// Final request document, ready for any HTTP client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRequest {
    pub method: HttpMethod,
    pub url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl ResolvedRequest {
    /// URL with the URL-encoded query string appended.
    pub fn full_url(&self) -> String {
        if self.query.is_empty() {
            return self.url.clone();
        }

        let query = self
            .query
            .iter()
            .map(|(key, value)| {
                let text = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                format!("{}={}", urlencoding::encode(key), urlencoding::encode(&text))
            })
            .collect::<Vec<_>>()
            .join("&");

        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{}{}", self.url, separator, query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn field_kind_accepts_options_alias() {
        let kind: FieldKind = serde_json::from_value(json!("options")).unwrap();
        assert_eq!(kind, FieldKind::Enum);
        let kind: FieldKind = serde_json::from_value(json!("group")).unwrap();
        assert_eq!(kind.as_str(), "group");
    }

    #[test]
    fn http_method_parse() {
        assert_eq!(HttpMethod::parse("post"), Some(HttpMethod::Post));
        assert_eq!(HttpMethod::parse("DELETE"), Some(HttpMethod::Delete));
        assert_eq!(HttpMethod::parse("TRACE"), None);
    }

    #[test]
    fn discriminant_builder() {
        let d = Discriminant::new("authentications", "createAuthentication")
            .select("input", "auth_basic");
        assert_eq!(d.selection("input"), Some(&json!("auth_basic")));
        assert_eq!(d.selection("other"), None);
    }

    #[test]
    fn discriminant_deserializes_without_selections() {
        let d: Discriminant =
            serde_json::from_value(json!({"resource": "indexes", "operation": "search"})).unwrap();
        assert!(d.selections.is_empty());
    }

    #[test]
    fn full_url_encodes_query() {
        let mut query = BTreeMap::new();
        query.insert("facetFilters".to_string(), json!("[\"brand:acme\"]"));
        query.insert("page".to_string(), json!(2));
        let request = ResolvedRequest {
            method: HttpMethod::Get,
            url: "https://data.example.com/1/indexes/products".into(),
            query,
            body: None,
        };
        assert_eq!(
            request.full_url(),
            "https://data.example.com/1/indexes/products?facetFilters=%5B%22brand%3Aacme%22%5D&page=2"
        );
    }

    #[test]
    fn resolved_request_omits_empty_channels() {
        let request = ResolvedRequest {
            method: HttpMethod::Post,
            url: "/1/sources".into(),
            query: BTreeMap::new(),
            body: None,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"method": "POST", "url": "/1/sources"})
        );
    }
}
