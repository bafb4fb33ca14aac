//! Schema source loading from files, strings, and HTTP URLs.

use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::error::LoadError;
use crate::registry::{FieldRegistry, SchemaSource};

#[cfg(feature = "remote")]
use std::time::Duration;

/// Default timeout for HTTP requests (10 seconds).
#[cfg(feature = "remote")]
pub(crate) const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Load a schema source from a file path.
///
/// # Errors
///
/// Returns `LoadError::FileNotFound` if the file doesn't exist,
/// `LoadError::InvalidJson` if it isn't valid JSON, or
/// `LoadError::InvalidSource` if it isn't a schema source.
pub fn load_source(path: &Path) -> Result<SchemaSource, LoadError> {
    if !path.exists() {
        return Err(LoadError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let content = std::fs::read_to_string(path).map_err(|source| LoadError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;

    debug!(path = %path.display(), bytes = content.len(), "read schema source");
    load_source_str(&content)
}

/// Load a schema source from a JSON string.
///
/// # Errors
///
/// Returns `LoadError::InvalidJson` or `LoadError::InvalidSource`.
pub fn load_source_str(content: &str) -> Result<SchemaSource, LoadError> {
    let value: Value =
        serde_json::from_str(content).map_err(|source| LoadError::InvalidJson { source })?;
    source_from_value(value)
}

/// Interpret parsed JSON as a schema source.
pub fn source_from_value(value: Value) -> Result<SchemaSource, LoadError> {
    serde_json::from_value(value).map_err(|source| LoadError::InvalidSource { source })
}

/// Load a schema source from an HTTP/HTTPS URL.
///
/// Requires the `remote` feature (enabled by default).
///
/// # Errors
///
/// Returns `LoadError::NetworkError` if the request fails,
/// or `LoadError::InvalidSource` if the response isn't a schema source.
#[cfg(feature = "remote")]
pub fn load_source_url(url: &str) -> Result<SchemaSource, LoadError> {
    let client = reqwest::blocking::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|source| LoadError::NetworkError {
            url: url.to_string(),
            source,
        })?;

    let response = client
        .get(url)
        .send()
        .map_err(|source| LoadError::NetworkError {
            url: url.to_string(),
            source,
        })?;

    // Check for HTTP errors before parsing
    let response = response
        .error_for_status()
        .map_err(|source| LoadError::NetworkError {
            url: url.to_string(),
            source,
        })?;

    let value: Value = response.json().map_err(|source| LoadError::NetworkError {
        url: url.to_string(),
        source,
    })?;

    debug!(url, "fetched schema source");
    source_from_value(value)
}

/// Check if a string looks like a URL (starts with http:// or https://).
pub fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Load a schema source from a file path or URL.
///
/// URL loading requires the `remote` feature.
pub fn load_source_auto(source: &str) -> Result<SchemaSource, LoadError> {
    if is_url(source) {
        #[cfg(feature = "remote")]
        {
            load_source_url(source)
        }
        #[cfg(not(feature = "remote"))]
        {
            Err(LoadError::FileNotFound {
                path: std::path::PathBuf::from(source),
            })
        }
    } else {
        load_source(Path::new(source))
    }
}

/// Load and build a registry from a file path or URL.
///
/// # Errors
///
/// Returns any load error, or `LoadError::Schema` for a defective schema.
pub fn load_registry(source: &str) -> Result<FieldRegistry, LoadError> {
    let source = load_source_auto(source)?;
    Ok(FieldRegistry::from_source(&source)?)
}

/// Build a registry from a JSON string.
pub fn load_registry_str(content: &str) -> Result<FieldRegistry, LoadError> {
    let source = load_source_str(content)?;
    Ok(FieldRegistry::from_source(&source)?)
}
