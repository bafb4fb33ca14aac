//! Input validation for the active fields of an operation.

use serde_json::Value;

use crate::error::{FieldIssue, ResolveError};
use crate::registry::{tag_text, FieldDefinition};
use crate::types::{FieldKind, RawInputs};
use crate::visibility::ActiveFields;

/// Validate raw inputs against the active fields.
///
/// Checks required fields, variant selections, value types and constraints.
/// Inactive fields are never checked.
///
/// # Errors
///
/// Returns `ResolveError::Invalid` listing every problem found.
pub fn validate(active: &ActiveFields<'_>, inputs: &RawInputs) -> Result<(), ResolveError> {
    let issues = collect_issues(active, inputs);
    if issues.is_empty() {
        Ok(())
    } else {
        Err(ResolveError::Invalid { issues })
    }
}

/// All validation problems, in field declaration order.
pub fn collect_issues(active: &ActiveFields<'_>, inputs: &RawInputs) -> Vec<FieldIssue> {
    let mut issues = Vec::new();

    for field in active.iter() {
        if let Some(group) = field.variant_group() {
            match active.selection_at(field.index) {
                None if field.required => issues.push(issue(field, "a variant must be selected")),
                None => {}
                Some(selected) => {
                    let tag = tag_text(selected);
                    if group.branch(&tag).is_none() {
                        let known: Vec<&str> = group.tags().collect();
                        issues.push(issue(
                            field,
                            format!("unknown variant '{}'; expected one of: {}", tag, known.join(", ")),
                        ));
                    }
                }
            }
            continue;
        }

        // Derived values are checked through their inputs.
        if field.expression.is_some() {
            continue;
        }

        let value = if field.is_selector() {
            active.selection_at(field.index).cloned()
        } else {
            match inputs.get(&field.id) {
                Some(Value::Null) if !field.nullable => None,
                Some(value) => Some(value.clone()),
                None => None,
            }
            .or_else(|| field.default.clone())
        };
        let value = value.filter(|v| !is_blank_json(field, v));

        match value {
            None if field.required => issues.push(issue(field, "required field is missing")),
            None => {}
            // Parse errors of JSON text surface during resolution.
            Some(_) if field.kind == FieldKind::Json => {}
            Some(value) => check_value(field, &value, &mut issues),
        }
    }

    issues
}

fn check_value(field: &FieldDefinition, value: &Value, issues: &mut Vec<FieldIssue>) {
    issues.extend(field.check.errors(value).into_iter().map(|m| issue(field, m)));
}

/// Blank JSON text resolves to no value.
fn is_blank_json(field: &FieldDefinition, value: &Value) -> bool {
    field.kind == FieldKind::Json && matches!(value, Value::String(text) if text.trim().is_empty())
}

fn issue(field: &FieldDefinition, message: impl Into<String>) -> FieldIssue {
    FieldIssue {
        field: field.id.clone(),
        message: message.into(),
    }
}
