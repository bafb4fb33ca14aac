//! Value resolution - turns raw inputs into the final value of every active
//! field.
//!
//! Leaf fields take their raw input, else their default. Expression fields are
//! evaluated after everything they read, so a variant group sees the resolved
//! values of its members and a compose field those of its bindings.

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{FieldIssue, ResolveError};
use crate::path::{merge_entries, BodyPath};
use crate::registry::{
    tag_text, Binding, Channel, FieldDefinition, OperationSchema, TagSwitch, ValueExpression,
    VariantGroup,
};
use crate::types::{FieldKind, RawInputs};
use crate::visibility::ActiveFields;

/// Resolved value of every active field.
///
/// Inactive fields and fields with neither input nor default have no value.
#[derive(Debug, Clone)]
pub struct ResolvedValues<'r> {
    active: ActiveFields<'r>,
    values: Vec<Option<Value>>,
}

impl<'r> ResolvedValues<'r> {
    pub fn operation(&self) -> &'r OperationSchema {
        self.active.operation()
    }

    pub fn active(&self) -> &ActiveFields<'r> {
        &self.active
    }

    /// Value of the active field `id`.
    pub fn get(&self, id: &str) -> Option<&Value> {
        self.active
            .field(id)
            .and_then(|field| self.value_at(field.index))
    }

    /// Active fields that have a value, in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&'r FieldDefinition, &Value)> + '_ {
        self.active
            .iter()
            .filter_map(move |field| self.value_at(field.index).map(|value| (field, value)))
    }

    /// Values keyed by field id.
    pub fn to_map(&self) -> Map<String, Value> {
        self.iter()
            .map(|(field, value)| (field.id.clone(), value.clone()))
            .collect()
    }

    pub(crate) fn value_at(&self, index: usize) -> Option<&Value> {
        self.values[index].as_ref()
    }
}

/// Resolve the value of every active field.
///
/// Raw inputs for inactive fields, unknown ids and variant groups are
/// ignored. Selector fields take the value computed during visibility
/// evaluation.
///
/// # Errors
///
/// - [`ResolveError::MalformedJson`] when a JSON field's text does not parse.
/// - [`ResolveError::Invalid`] when a required field ends up without a value,
///   for example blank JSON text or a compose field with nothing bound.
/// - [`ResolveError::AmbiguousVariant`] when a group has active fields outside
///   its selected branch.
/// - [`ResolveError::PathConflict`] when two values claim the same slot.
pub fn resolve<'r>(
    active: ActiveFields<'r>,
    inputs: &RawInputs,
) -> Result<ResolvedValues<'r>, ResolveError> {
    let operation = active.operation();
    let fields = &operation.fields;
    let mut values: Vec<Option<Value>> = vec![None; fields.len()];

    for &index in &operation.value_order {
        if !active.is_active_index(index) {
            continue;
        }
        let field = &fields[index];
        let value = match &field.expression {
            None => leaf_value(field, &active, inputs)?,
            Some(ValueExpression::OneOf(group)) => {
                one_of(field, group, operation, &active, &values)?
            }
            Some(ValueExpression::Compose(bindings)) => compose(field, bindings, &values)?,
            Some(ValueExpression::Switch(switch)) => switch_value(switch, &active),
        };
        values[index] = value;
    }

    let missing: Vec<FieldIssue> = fields
        .iter()
        .filter(|f| f.required && f.kind != FieldKind::Group)
        .filter(|f| active.is_active_index(f.index) && values[f.index].is_none())
        .map(|f| FieldIssue {
            field: f.id.clone(),
            message: "required field has no value".into(),
        })
        .collect();
    if !missing.is_empty() {
        return Err(ResolveError::Invalid { issues: missing });
    }

    debug!(
        operation = %operation.qualified_name(),
        resolved = values.iter().filter(|v| v.is_some()).count(),
        "resolved field values"
    );

    Ok(ResolvedValues { active, values })
}

fn leaf_value(
    field: &FieldDefinition,
    active: &ActiveFields<'_>,
    inputs: &RawInputs,
) -> Result<Option<Value>, ResolveError> {
    if field.is_selector() {
        return Ok(active.selection_at(field.index).cloned());
    }

    let raw = match inputs.get(&field.id) {
        Some(Value::Null) if !field.nullable => None,
        Some(value) => Some(value.clone()),
        None => None,
    };

    match raw.or_else(|| field.default.clone()) {
        Some(Value::String(text)) if field.kind == FieldKind::Json => parse_json(field, &text),
        value => Ok(value),
    }
}

/// Parse JSON text; blank text counts as no value.
fn parse_json(field: &FieldDefinition, text: &str) -> Result<Option<Value>, ResolveError> {
    if text.trim().is_empty() {
        return Ok(None);
    }

    let parsed: Value = serde_json::from_str(text).map_err(|e| {
        let message = e.to_string();
        // serde_json appends the position, which is reported separately.
        let message = match message.rfind(" at line ") {
            Some(pos) => message[..pos].to_string(),
            None => message,
        };
        ResolveError::MalformedJson {
            field: field.id.clone(),
            line: e.line(),
            column: e.column(),
            message,
        }
    })?;

    if parsed.is_null() && !field.nullable {
        return Ok(None);
    }
    Ok(Some(parsed))
}

fn one_of(
    field: &FieldDefinition,
    group: &VariantGroup,
    operation: &OperationSchema,
    active: &ActiveFields<'_>,
    values: &[Option<Value>],
) -> Result<Option<Value>, ResolveError> {
    // A group that is not sent only steers visibility.
    if field.channel == Channel::None {
        return Ok(None);
    }
    let Some(selected) = active.selection_at(field.index) else {
        return Ok(None);
    };
    let selected = tag_text(selected);
    // Unknown tags are reported by the validator.
    let Some(branch) = group.branch(&selected) else {
        return Ok(None);
    };

    let strays: Vec<String> = group
        .owned
        .iter()
        .copied()
        .filter(|&i| active.is_active_index(i))
        .filter(|&i| !branch.members.iter().any(|m| m.index == i))
        .map(|i| operation.fields[i].id.clone())
        .collect();
    if !strays.is_empty() {
        return Err(ResolveError::AmbiguousVariant {
            group: field.id.clone(),
            selected,
            fields: strays,
        });
    }

    let contributions: Vec<(&BodyPath, usize, Value)> = branch
        .members
        .iter()
        .filter(|m| active.is_active_index(m.index))
        .filter_map(|m| {
            let member = &operation.fields[m.index];
            let value = values[m.index].clone()?;
            Some((member.body_path()?, m.index, value))
        })
        .collect();

    let object = merge_entries(contributions).map_err(|(index, path)| {
        ResolveError::PathConflict {
            field: operation.fields[index].id.clone(),
            path,
        }
    })?;
    Ok(Some(Value::Object(object)))
}

fn compose(
    field: &FieldDefinition,
    bindings: &[Binding],
    values: &[Option<Value>],
) -> Result<Option<Value>, ResolveError> {
    let bound: Vec<(&BodyPath, usize, Value)> = bindings
        .iter()
        .filter_map(|b| {
            let value = values[b.field.index].clone()?;
            Some((&b.key, b.field.index, value))
        })
        .collect();
    if bound.is_empty() {
        return Ok(None);
    }

    let object = merge_entries(bound).map_err(|(_, path)| ResolveError::PathConflict {
        field: field.id.clone(),
        path,
    })?;
    Ok(Some(Value::Object(object)))
}

fn switch_value(switch: &TagSwitch, active: &ActiveFields<'_>) -> Option<Value> {
    if !active.is_active_index(switch.selector.index) {
        return None;
    }
    let tag = tag_text(active.selection_at(switch.selector.index)?);
    switch
        .cases
        .iter()
        .find(|(case, _)| *case == tag)
        .map(|(_, value)| value.clone())
}
