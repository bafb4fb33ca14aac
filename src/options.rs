//! Choice lists for enum fields.
//!
//! Static options come straight from the registry. Dynamic options are
//! fetched through an [`OptionLoader`]; when that fails the field degrades to
//! free-text entry instead of failing the whole form.

use serde_json::Value;
use tracing::warn;

use crate::error::{ResolveError, TransportError};
use crate::registry::FieldDefinition;
use crate::types::OptionItem;
use crate::visibility::ActiveFields;

#[cfg(feature = "remote")]
use crate::types::HttpMethod;
#[cfg(feature = "remote")]
use std::time::Duration;

/// Fetches the runtime choice list of a field with dynamic options.
pub trait OptionLoader: Send + Sync {
    fn load_options(&self, field: &FieldDefinition) -> Result<Vec<OptionItem>, TransportError>;
}

/// What a user can enter for a field.
#[derive(Debug)]
pub enum FieldChoices {
    Static(Vec<OptionItem>),
    Loaded(Vec<OptionItem>),
    /// No fixed list; `cause` is set when loading one failed.
    FreeText { cause: Option<TransportError> },
}

impl FieldChoices {
    pub fn items(&self) -> &[OptionItem] {
        match self {
            FieldChoices::Static(items) | FieldChoices::Loaded(items) => items,
            FieldChoices::FreeText { .. } => &[],
        }
    }

    pub fn is_free_text(&self) -> bool {
        matches!(self, FieldChoices::FreeText { .. })
    }
}

/// Choices for the active field `field_id`.
///
/// # Errors
///
/// Returns [`ResolveError::InactiveField`] when the field does not exist or
/// is not active. Loader failures are not errors: they yield
/// [`FieldChoices::FreeText`] carrying the cause.
pub fn field_choices(
    active: &ActiveFields<'_>,
    field_id: &str,
    loader: Option<&dyn OptionLoader>,
) -> Result<FieldChoices, ResolveError> {
    let field = active
        .field(field_id)
        .ok_or_else(|| ResolveError::InactiveField {
            field: field_id.to_string(),
        })?;

    if field.dynamic_options.is_none() {
        if field.options.is_empty() {
            return Ok(FieldChoices::FreeText { cause: None });
        }
        return Ok(FieldChoices::Static(field.options.clone()));
    }

    let Some(loader) = loader else {
        return Ok(FieldChoices::FreeText { cause: None });
    };
    match loader.load_options(field) {
        Ok(items) => Ok(FieldChoices::Loaded(items)),
        Err(e) => {
            warn!(field = %field.id, error = %e, "option loading failed, falling back to free text");
            Ok(FieldChoices::FreeText { cause: Some(e) })
        }
    }
}

/// Map an option endpoint response to choices.
///
/// Expects `{<items_property>: [{"name": ...}, ...]}`; each item's name is
/// both label and value.
pub fn items_from_response(
    url: &str,
    body: &Value,
    items_property: &str,
) -> Result<Vec<OptionItem>, TransportError> {
    let invalid = |message: String| TransportError::InvalidPayload {
        url: url.to_string(),
        message,
    };

    let items = body
        .get(items_property)
        .and_then(Value::as_array)
        .ok_or_else(|| invalid(format!("missing '{}' array", items_property)))?;

    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let name = item
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid(format!("item {} has no string 'name'", i)))?;
            Ok(OptionItem {
                label: name.to_string(),
                value: Value::String(name.to_string()),
            })
        })
        .collect()
}

/// [`OptionLoader`] backed by a blocking HTTP client.
#[cfg(feature = "remote")]
#[derive(Debug, Clone)]
pub struct HttpOptionLoader {
    client: reqwest::blocking::Client,
    base_url: String,
    headers: Vec<(String, String)>,
    timeout: Duration,
}

#[cfg(feature = "remote")]
impl HttpOptionLoader {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            base_url: base_url.into(),
            headers: Vec::new(),
            timeout: crate::loader::HTTP_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send `name: value` with every option request, e.g. credentials.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    fn url_for(&self, path: &str) -> String {
        if crate::loader::is_url(path) {
            return path.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[cfg(feature = "remote")]
impl OptionLoader for HttpOptionLoader {
    fn load_options(&self, field: &FieldDefinition) -> Result<Vec<OptionItem>, TransportError> {
        let Some(dynamic) = &field.dynamic_options else {
            return Ok(field.options.clone());
        };
        let url = self.url_for(&dynamic.url);
        let network = |source| TransportError::Network {
            url: url.clone(),
            source,
        };

        let mut request = match dynamic.method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
            HttpMethod::Put => self.client.put(&url),
            HttpMethod::Patch => self.client.patch(&url),
            HttpMethod::Delete => self.client.delete(&url),
        };
        request = request.timeout(self.timeout);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().map_err(network)?;
        let response = response.error_for_status().map_err(network)?;
        let body: Value = response.json().map_err(network)?;

        items_from_response(&url, &body, &dynamic.items_property)
    }
}
