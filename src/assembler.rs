//! Request assembly - writes resolved values into URL, query and body.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::ResolveError;
use crate::path::{merge_entries, BodyPath, UrlSegment};
use crate::registry::{tag_text, Channel, FieldDefinition};
use crate::resolver::ResolvedValues;
use crate::types::{QueryEncoding, ResolvedRequest};

/// Build the final request from resolved values.
///
/// Only active fields with a value contribute. Body fields owned by a
/// variant group are written through the group, never directly. Body paths
/// are merged in path order, so the result does not depend on the order
/// fields were declared in. Array indices with gaps are closed up.
///
/// # Errors
///
/// - [`ResolveError::UnresolvedPlaceholder`] when a URL placeholder has no value.
/// - [`ResolveError::QueryEncoding`] when a query value cannot be encoded.
/// - [`ResolveError::PathConflict`] when two body values claim the same slot.
pub fn assemble(
    values: &ResolvedValues<'_>,
    base_url: Option<&str>,
) -> Result<ResolvedRequest, ResolveError> {
    let operation = values.operation();

    Ok(ResolvedRequest {
        method: operation.method,
        url: build_url(values, base_url)?,
        query: build_query(values)?,
        body: build_body(values)?,
    })
}

fn build_url(values: &ResolvedValues<'_>, base_url: Option<&str>) -> Result<String, ResolveError> {
    let mut path = String::new();
    for segment in values.operation().url.segments() {
        match segment {
            UrlSegment::Literal(text) => path.push_str(text),
            UrlSegment::Placeholder(name) => {
                let value = values
                    .iter()
                    .find(|(field, _)| field.id == *name && field.channel == Channel::Path)
                    .map(|(_, value)| value)
                    .ok_or_else(|| ResolveError::UnresolvedPlaceholder {
                        placeholder: name.clone(),
                    })?;
                path.push_str(&urlencoding::encode(&tag_text(value)));
            }
        }
    }

    if path.starts_with("http://") || path.starts_with("https://") {
        return Ok(path);
    }
    match base_url {
        Some(base) => {
            let base = base.trim_end_matches('/');
            if path.starts_with('/') {
                Ok(format!("{}{}", base, path))
            } else {
                Ok(format!("{}/{}", base, path))
            }
        }
        None => Ok(path),
    }
}

fn build_query(values: &ResolvedValues<'_>) -> Result<BTreeMap<String, Value>, ResolveError> {
    let mut query = BTreeMap::new();

    for (field, value) in values.iter() {
        let Channel::Query { key, encoding } = &field.channel else {
            continue;
        };
        let encoded = encode_query(field, value, *encoding)?;
        match query.get(key) {
            Some(existing) if *existing != encoded => {
                return Err(ResolveError::PathConflict {
                    field: field.id.clone(),
                    path: key.clone(),
                });
            }
            Some(_) => {}
            None => {
                query.insert(key.clone(), encoded);
            }
        }
    }

    Ok(query)
}

fn encode_query(
    field: &FieldDefinition,
    value: &Value,
    encoding: QueryEncoding,
) -> Result<Value, ResolveError> {
    match (encoding, value) {
        (QueryEncoding::Json, value) => Ok(Value::String(value.to_string())),
        (QueryEncoding::Auto, Value::Array(_) | Value::Object(_)) => {
            Ok(Value::String(value.to_string()))
        }
        (QueryEncoding::Comma, Value::Array(items)) => {
            let parts = items
                .iter()
                .map(|item| match item {
                    Value::Array(_) | Value::Object(_) => Err(ResolveError::QueryEncoding {
                        field: field.id.clone(),
                        message: "comma encoding needs an array of scalars".into(),
                    }),
                    scalar => Ok(tag_text(scalar)),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::String(parts.join(",")))
        }
        (QueryEncoding::Comma, Value::Object(_)) => Err(ResolveError::QueryEncoding {
            field: field.id.clone(),
            message: "comma encoding cannot represent an object".into(),
        }),
        (_, scalar) => Ok(scalar.clone()),
    }
}

fn build_body(values: &ResolvedValues<'_>) -> Result<Option<Value>, ResolveError> {
    let contributions: Vec<(&BodyPath, usize, Value)> = values
        .iter()
        .filter(|(field, _)| field.owner.is_none())
        .filter_map(|(field, value)| Some((field.body_path()?, field.index, value.clone())))
        .collect();
    if contributions.is_empty() {
        return Ok(None);
    }

    let operation = values.operation();
    let body = merge_entries(contributions).map_err(|(index, path)| {
        ResolveError::PathConflict {
            field: operation.fields[index].id.clone(),
            path,
        }
    })?;
    Ok(Some(Value::Object(body)))
}
