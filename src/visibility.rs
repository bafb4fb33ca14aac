//! Visibility evaluation: which fields of an operation are active under a
//! discriminant.

use serde_json::Value;

use crate::error::ResolveError;
use crate::registry::{tag_text, FieldDefinition, FieldRegistry, OperationSchema};
use crate::types::{Discriminant, FieldKind, RawInputs};

/// Active subset of one operation's fields.
///
/// Also carries the current value of every selector field, as given by
/// [`selector_value`].
#[derive(Debug, Clone)]
pub struct ActiveFields<'r> {
    operation: &'r OperationSchema,
    active: Vec<bool>,
    selections: Vec<Option<Value>>,
}

/// Compute the active fields for `discriminant` alone.
///
/// Plain fields that gate visibility read only their selection or default
/// here; use [`active_fields_with_inputs`] when raw inputs are at hand.
///
/// # Errors
///
/// Returns [`ResolveError::UnknownOperation`] when the registry has no such
/// resource/operation pair.
pub fn active_fields<'r>(
    registry: &'r FieldRegistry,
    discriminant: &Discriminant,
) -> Result<ActiveFields<'r>, ResolveError> {
    active_fields_with_inputs(registry, discriminant, &RawInputs::new())
}

/// Compute the active fields for `discriminant` and raw `inputs`.
///
/// # Errors
///
/// Returns [`ResolveError::UnknownOperation`] when the registry has no such
/// resource/operation pair.
pub fn active_fields_with_inputs<'r>(
    registry: &'r FieldRegistry,
    discriminant: &Discriminant,
    inputs: &RawInputs,
) -> Result<ActiveFields<'r>, ResolveError> {
    let operation = registry
        .operation(&discriminant.resource, &discriminant.operation)
        .ok_or_else(|| ResolveError::UnknownOperation {
            resource: discriminant.resource.clone(),
            operation: discriminant.operation.clone(),
        })?;
    Ok(ActiveFields::evaluate(operation, discriminant, inputs))
}

/// Current value of a selector field.
///
/// A variant group takes its selection, else its default. Any other field
/// that gates visibility is a plain field: its selection wins, then its raw
/// input, then its default.
pub fn selector_value(
    field: &FieldDefinition,
    discriminant: &Discriminant,
    inputs: &RawInputs,
) -> Option<Value> {
    let selected = discriminant.selection(&field.id).cloned();
    let raw = if field.kind == FieldKind::Group {
        None
    } else {
        match inputs.get(&field.id) {
            Some(Value::Null) if !field.nullable => None,
            other => other.cloned(),
        }
    };
    selected.or(raw).or_else(|| field.default.clone())
}

impl<'r> ActiveFields<'r> {
    pub(crate) fn evaluate(
        operation: &'r OperationSchema,
        discriminant: &Discriminant,
        inputs: &RawInputs,
    ) -> Self {
        let selections: Vec<Option<Value>> = operation
            .fields
            .iter()
            .map(|f| {
                if f.is_selector() {
                    selector_value(f, discriminant, inputs)
                } else {
                    None
                }
            })
            .collect();

        let mut active = vec![false; operation.fields.len()];
        // Selectors come first, so every condition reads a settled state.
        for &index in &operation.visibility_order {
            let visible = operation.fields[index].visibility.iter().all(|condition| {
                let selector = condition.selector.index;
                active[selector]
                    && selections[selector]
                        .as_ref()
                        .is_some_and(|value| matches_any(&condition.allowed, value))
            });
            active[index] = visible;
        }

        Self {
            operation,
            active,
            selections,
        }
    }

    pub fn operation(&self) -> &'r OperationSchema {
        self.operation
    }

    /// Active fields in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &'r FieldDefinition> + '_ {
        let operation: &'r OperationSchema = self.operation;
        operation.fields.iter().filter(move |f| self.active[f.index])
    }

    /// The active field declared as `id`, if any.
    pub fn field(&self, id: &str) -> Option<&'r FieldDefinition> {
        let operation: &'r OperationSchema = self.operation;
        operation
            .fields
            .iter()
            .find(|f| f.id == id && self.active[f.index])
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.field(id).is_some()
    }

    /// Current value of the active selector `id`.
    pub fn selection(&self, id: &str) -> Option<&Value> {
        self.field(id).and_then(|f| self.selection_at(f.index))
    }

    pub fn len(&self) -> usize {
        self.active.iter().filter(|a| **a).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn is_active_index(&self, index: usize) -> bool {
        self.active[index]
    }

    pub(crate) fn selection_at(&self, index: usize) -> Option<&Value> {
        self.selections[index].as_ref()
    }
}
