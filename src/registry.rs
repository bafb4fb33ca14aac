//! Field registry - the immutable, per-operation view of a schema source.
//!
//! The source format is a flat list of properties whose `displayOptions.show`
//! predicates encode nesting. [`FieldRegistry::from_source`] scopes the
//! properties to every resource/operation pair, resolves all references and
//! rejects defective schemas up front, so resolution never has to.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::SchemaError;
use crate::path::{BodyPath, UrlTemplate};
use crate::types::{
    json_type_name, Constraints, FieldKind, HttpMethod, OptionItem, QueryEncoding,
    OPERATION_FIELD, RESOURCE_FIELD,
};

// --- Source format ---

/// Declarative schema as found in the integration's field tables.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSource {
    #[serde(default)]
    pub request_defaults: RequestDefaults,
    pub properties: Vec<PropertySource>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestDefaults {
    #[serde(default, rename = "baseURL", alias = "baseUrl")]
    pub base_url: Option<String>,
}

/// One property entry of the source table.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertySource {
    #[serde(default)]
    pub display_name: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub options: Vec<OptionSource>,
    #[serde(default)]
    pub display_options: DisplayOptions,
    #[serde(default)]
    pub type_options: TypeOptions,
    #[serde(default)]
    pub routing: RoutingSource,
    #[serde(default)]
    pub value_from: Option<ValueFromSource>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OptionSource {
    pub name: String,
    pub value: Value,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub routing: RoutingSource,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DisplayOptions {
    #[serde(default)]
    pub show: BTreeMap<String, Vec<Value>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeOptions {
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub min_length: Option<u64>,
    pub max_length: Option<u64>,
    pub pattern: Option<String>,
    pub load_options: Option<LoadOptionsSource>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadOptionsSource {
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub items_property: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoutingSource {
    #[serde(default)]
    pub request: Option<RequestSource>,
    #[serde(default)]
    pub send: Option<SendSource>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestSource {
    #[serde(default)]
    pub method: Option<String>,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendSource {
    #[serde(default, rename = "type")]
    pub channel: Option<SendChannel>,
    #[serde(default)]
    pub property: Option<String>,
    #[serde(default)]
    pub encoding: QueryEncoding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendChannel {
    Body,
    Query,
    Path,
    None,
}

/// Data form of a value expression.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueFromSource {
    Compose(Vec<BindingSource>),
    Switch(SwitchSource),
}

#[derive(Debug, Clone, Deserialize)]
pub struct BindingSource {
    pub field: String,
    pub key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwitchSource {
    pub selector: String,
    pub cases: Map<String, Value>,
}

// --- Built registry ---

/// Part of the request a field's value is written into.
#[derive(Debug, Clone, PartialEq)]
pub enum Channel {
    /// Substituted into the URL template.
    Path,
    Query {
        key: String,
        encoding: QueryEncoding,
    },
    /// Merged into the JSON body at the path (relative to the owning group
    /// when the field has an owner).
    Body(BodyPath),
    /// Not written anywhere: pure selectors and expression inputs.
    None,
}

/// Reference to another field of the same operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    pub id: String,
    pub(crate) index: usize,
}

/// Visibility condition: `selector`'s current value must be in `allowed`.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub selector: FieldRef,
    pub allowed: Vec<Value>,
}

/// One mutually exclusive shape of a variant group.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantBranch {
    pub tag: String,
    pub label: String,
    /// Body fields composed into this branch's object.
    pub members: Vec<FieldRef>,
}

/// Branches of a `group` field, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantGroup {
    pub branches: Vec<VariantBranch>,
    /// Every field owned by the group, across all branches.
    pub(crate) owned: Vec<usize>,
}

impl VariantGroup {
    pub fn branch(&self, tag: &str) -> Option<&VariantBranch> {
        self.branches.iter().find(|b| b.tag == tag)
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.branches.iter().map(|b| b.tag.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub field: FieldRef,
    pub key: BodyPath,
}

/// Constant chosen by a selector's current tag.
#[derive(Debug, Clone, PartialEq)]
pub struct TagSwitch {
    pub selector: FieldRef,
    pub cases: Vec<(String, Value)>,
}

/// How a field's value is derived from other fields.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueExpression {
    /// First branch matching the group's selection, built from its members.
    OneOf(VariantGroup),
    /// Object of `key -> field value`, undefined values omitted.
    Compose(Vec<Binding>),
    Switch(TagSwitch),
}

/// Runtime-fetched choice list of an enum field.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicOptions {
    pub url: String,
    pub method: HttpMethod,
    pub items_property: String,
}

/// One editable field, scoped to a single operation.
#[derive(Debug, Clone)]
pub struct FieldDefinition {
    pub id: String,
    pub display_name: String,
    pub description: Option<String>,
    pub kind: FieldKind,
    pub channel: Channel,
    pub required: bool,
    pub nullable: bool,
    pub default: Option<Value>,
    pub constraints: Constraints,
    /// Static choices of an enum field, or the branch tags of a group.
    pub options: Vec<OptionItem>,
    pub dynamic_options: Option<DynamicOptions>,
    pub visibility: Vec<Condition>,
    pub expression: Option<ValueExpression>,
    /// Nearest composite group this field's body value is nested in.
    pub owner: Option<FieldRef>,
    pub(crate) index: usize,
    pub(crate) selector: bool,
    pub(crate) check: ConstraintCheck,
}

/// A field's constraint schema, compiled once when the registry is built.
#[derive(Clone)]
pub(crate) struct ConstraintCheck {
    schema: Value,
    validator: Arc<jsonschema::Validator>,
}

impl ConstraintCheck {
    fn compile(schema: Value) -> Result<Self, String> {
        let validator = jsonschema::validator_for(&schema).map_err(|e| e.to_string())?;
        Ok(Self {
            schema,
            validator: Arc::new(validator),
        })
    }

    pub(crate) fn schema(&self) -> &Value {
        &self.schema
    }

    /// Messages for every constraint `value` violates.
    pub(crate) fn errors(&self, value: &Value) -> Vec<String> {
        self.validator
            .iter_errors(value)
            .map(|e| e.to_string())
            .collect()
    }
}

impl fmt::Debug for ConstraintCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstraintCheck")
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

impl FieldDefinition {
    /// Whether other fields depend on this field's current selection.
    pub fn is_selector(&self) -> bool {
        self.selector
    }

    pub fn variant_group(&self) -> Option<&VariantGroup> {
        match &self.expression {
            Some(ValueExpression::OneOf(group)) => Some(group),
            _ => None,
        }
    }

    pub fn body_path(&self) -> Option<&BodyPath> {
        match &self.channel {
            Channel::Body(path) => Some(path),
            _ => None,
        }
    }
}

/// All fields of one resource/operation pair.
#[derive(Debug, Clone)]
pub struct OperationSchema {
    pub resource: String,
    pub name: String,
    pub method: HttpMethod,
    pub url: UrlTemplate,
    pub fields: Vec<FieldDefinition>,
    /// Selectors before the fields they gate.
    pub(crate) visibility_order: Vec<usize>,
    /// Dependencies before the expressions that read them.
    pub(crate) value_order: Vec<usize>,
}

impl OperationSchema {
    /// `resource/operation`, as used in messages.
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.resource, self.name)
    }

    /// First field declared with `id`.
    pub fn field(&self, id: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.id == id)
    }

    /// Every field declared with `id`; more than one only across exclusive branches.
    pub fn fields_named<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a FieldDefinition> {
        self.fields.iter().filter(move |f| f.id == id)
    }
}

/// Immutable table of every operation's fields.
///
/// Built once at startup; read-only and shareable across threads afterwards.
#[derive(Debug, Clone)]
pub struct FieldRegistry {
    base_url: Option<String>,
    operations: BTreeMap<String, BTreeMap<String, OperationSchema>>,
}

impl FieldRegistry {
    /// Build the registry, rejecting any schema defect.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError` for unknown or ambiguous references, cycles,
    /// unreachable variants, invalid paths or templates.
    pub fn from_source(source: &SchemaSource) -> Result<Self, SchemaError> {
        let resources = resource_values(source)?;
        let mut operations: BTreeMap<String, BTreeMap<String, OperationSchema>> = BTreeMap::new();
        let mut declared = 0usize;

        for property in source.properties.iter().filter(|p| p.name == OPERATION_FIELD) {
            for resource in &resources {
                if !shows(property, RESOURCE_FIELD, resource) {
                    continue;
                }
                for option in &property.options {
                    let name = option.value.as_str().ok_or_else(|| SchemaError::InvalidField {
                        field: OPERATION_FIELD.to_string(),
                        message: format!(
                            "operation value must be a string, got {}",
                            json_type_name(&option.value)
                        ),
                    })?;
                    let request =
                        option
                            .routing
                            .request
                            .as_ref()
                            .ok_or_else(|| SchemaError::InvalidField {
                                field: OPERATION_FIELD.to_string(),
                                message: format!("operation '{}' has no routing.request", name),
                            })?;

                    let schema = build_operation(source, resource, name, request)?;
                    let by_name = operations.entry(resource.clone()).or_default();
                    if by_name.contains_key(name) {
                        return Err(SchemaError::DuplicateOperation {
                            resource: resource.clone(),
                            operation: name.to_string(),
                        });
                    }
                    by_name.insert(name.to_string(), schema);
                    declared += 1;
                }
            }
        }

        if declared == 0 {
            return Err(SchemaError::MissingOperations);
        }

        debug!(
            resources = resources.len(),
            operations = declared,
            "built field registry"
        );

        Ok(Self {
            base_url: source.request_defaults.base_url.clone(),
            operations,
        })
    }

    /// Override the base URL requests are resolved against.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    pub fn operation(&self, resource: &str, operation: &str) -> Option<&OperationSchema> {
        self.operations.get(resource)?.get(operation)
    }

    /// Every operation, ordered by resource then operation name.
    pub fn operations(&self) -> impl Iterator<Item = &OperationSchema> {
        self.operations.values().flat_map(|ops| ops.values())
    }

    pub fn resources(&self) -> impl Iterator<Item = &str> {
        self.operations.keys().map(String::as_str)
    }
}

/// Whether `property` is shown when `key` has `value`.
///
/// A property without a constraint on `key` is shown for every value.
pub(crate) fn shows(property: &PropertySource, key: &str, value: &str) -> bool {
    property
        .display_options
        .show
        .get(key)
        .map(|allowed| allowed.iter().any(|v| v.as_str() == Some(value)))
        .unwrap_or(true)
}

fn resource_values(source: &SchemaSource) -> Result<Vec<String>, SchemaError> {
    let property = source
        .properties
        .iter()
        .find(|p| p.name == RESOURCE_FIELD)
        .ok_or(SchemaError::MissingResources)?;

    property
        .options
        .iter()
        .map(|option| {
            option
                .value
                .as_str()
                .map(String::from)
                .ok_or_else(|| SchemaError::InvalidField {
                    field: RESOURCE_FIELD.to_string(),
                    message: format!(
                        "resource value must be a string, got {}",
                        json_type_name(&option.value)
                    ),
                })
        })
        .collect()
}

fn build_operation(
    source: &SchemaSource,
    resource: &str,
    operation: &str,
    request: &RequestSource,
) -> Result<OperationSchema, SchemaError> {
    let qualified = format!("{}/{}", resource, operation);

    let method = match &request.method {
        None => HttpMethod::Get,
        Some(m) => HttpMethod::parse(m).ok_or_else(|| SchemaError::InvalidField {
            field: OPERATION_FIELD.to_string(),
            message: format!("unknown method '{}' for {}", m, qualified),
        })?,
    };
    let url = UrlTemplate::parse(&request.url).map_err(|message| SchemaError::InvalidTemplate {
        operation: qualified.clone(),
        message,
    })?;

    let properties = scope_properties(source, resource, operation);

    let mut fields = properties
        .iter()
        .enumerate()
        .map(|(index, property)| build_field(property, index))
        .collect::<Result<Vec<_>, _>>()?;

    let scope = Scope::new(&qualified, &fields);
    let conditions = properties
        .iter()
        .enumerate()
        .map(|(index, property)| scope.conditions(property, &fields[index], &fields))
        .collect::<Result<Vec<_>, _>>()?;
    for (field, conditions) in fields.iter_mut().zip(conditions) {
        field.visibility = conditions;
    }
    let targets: Vec<usize> = fields
        .iter()
        .flat_map(|f| f.visibility.iter().map(|c| c.selector.index))
        .collect();
    for target in targets {
        fields[target].selector = true;
    }
    scope.check_duplicates(&fields)?;

    let visibility_deps: Vec<Vec<usize>> = fields
        .iter()
        .map(|f| f.visibility.iter().map(|c| c.selector.index).collect())
        .collect();
    let visibility_order =
        topo_order(&visibility_deps).map_err(|cycle| scope.cycle_error(&fields, cycle))?;

    assign_owners(&mut fields, &visibility_order)?;

    for (index, property) in properties.iter().enumerate() {
        let expression = scope.expression(property, index, &fields)?;
        if let Some(ValueExpression::Switch(switch)) = &expression {
            fields[switch.selector.index].selector = true;
        }
        fields[index].expression = expression;
    }

    let value_deps: Vec<Vec<usize>> = fields
        .iter()
        .map(|f| match &f.expression {
            Some(ValueExpression::OneOf(group)) => group.owned.clone(),
            Some(ValueExpression::Compose(bindings)) => {
                bindings.iter().map(|b| b.field.index).collect()
            }
            Some(ValueExpression::Switch(_)) | None => Vec::new(),
        })
        .collect();
    let value_order = topo_order(&value_deps).map_err(|cycle| scope.cycle_error(&fields, cycle))?;

    for placeholder in url.placeholders() {
        let is_path_field = scope
            .indices(placeholder)
            .iter()
            .any(|&i| fields[i].channel == Channel::Path);
        if !is_path_field {
            return Err(SchemaError::UnknownPlaceholder {
                operation: qualified.clone(),
                placeholder: placeholder.to_string(),
            });
        }
    }

    debug!(operation = %qualified, fields = fields.len(), "scoped operation");

    Ok(OperationSchema {
        resource: resource.to_string(),
        name: operation.to_string(),
        method,
        url,
        fields,
        visibility_order,
        value_order,
    })
}

/// Properties shown for `resource`/`operation`.
///
/// A property that depends on a field declared only for other operations is
/// left out as well, transitively. References to names declared nowhere stay
/// in scope so that the lookup reports them.
fn scope_properties<'s>(
    source: &'s SchemaSource,
    resource: &str,
    operation: &str,
) -> Vec<&'s PropertySource> {
    let declared: BTreeSet<&str> = source.properties.iter().map(|p| p.name.as_str()).collect();

    let mut properties: Vec<&PropertySource> = source
        .properties
        .iter()
        .filter(|p| p.name != RESOURCE_FIELD && p.name != OPERATION_FIELD)
        .filter(|p| shows(p, RESOURCE_FIELD, resource) && shows(p, OPERATION_FIELD, operation))
        .collect();

    loop {
        let names: BTreeSet<&str> = properties.iter().map(|p| p.name.as_str()).collect();
        let before = properties.len();
        properties.retain(|p| {
            references(p)
                .into_iter()
                .all(|r| names.contains(r) || !declared.contains(r))
        });
        if properties.len() == before {
            return properties;
        }
    }
}

/// Names a property's visibility or value depends on.
fn references(property: &PropertySource) -> Vec<&str> {
    let mut names: Vec<&str> = property
        .display_options
        .show
        .keys()
        .map(String::as_str)
        .filter(|k| *k != RESOURCE_FIELD && *k != OPERATION_FIELD)
        .collect();
    match &property.value_from {
        Some(ValueFromSource::Compose(bindings)) => {
            names.extend(bindings.iter().map(|b| b.field.as_str()));
        }
        Some(ValueFromSource::Switch(switch)) => names.push(switch.selector.as_str()),
        None => {}
    }
    names
}

/// Field definition without cross-field information.
fn build_field(property: &PropertySource, index: usize) -> Result<FieldDefinition, SchemaError> {
    let invalid = |message: String| SchemaError::InvalidField {
        field: property.name.clone(),
        message,
    };

    let channel = match &property.routing.send {
        None => Channel::None,
        Some(send) => match send.channel.unwrap_or(SendChannel::Body) {
            SendChannel::Body => {
                let raw = send.property.as_deref().unwrap_or(&property.name);
                Channel::Body(BodyPath::parse(raw).map_err(|message| {
                    SchemaError::InvalidPath {
                        field: property.name.clone(),
                        message,
                    }
                })?)
            }
            SendChannel::Query => Channel::Query {
                key: send.property.clone().unwrap_or_else(|| property.name.clone()),
                encoding: send.encoding,
            },
            SendChannel::Path => Channel::Path,
            SendChannel::None => Channel::None,
        },
    };

    if property.kind == FieldKind::Group {
        if property.options.is_empty() {
            return Err(invalid("variant group declares no options".into()));
        }
        if !matches!(channel, Channel::Body(_) | Channel::None) {
            return Err(invalid("variant group can only be sent in the body".into()));
        }
        let mut seen = BTreeSet::new();
        for option in &property.options {
            let tag = option.value.as_str().ok_or_else(|| {
                invalid(format!(
                    "variant tag must be a string, got {}",
                    json_type_name(&option.value)
                ))
            })?;
            if !seen.insert(tag) {
                return Err(SchemaError::DuplicateVariant {
                    group: property.name.clone(),
                    tag: tag.to_string(),
                });
            }
        }
        if let Some(default) = &property.default {
            if !property.options.iter().any(|o| &o.value == default) {
                return Err(invalid(format!("default {} is not a variant", default)));
            }
        }
    }

    let dynamic_options = match &property.type_options.load_options {
        None => None,
        Some(load) => {
            if property.kind != FieldKind::Enum {
                return Err(invalid("only enum fields can load options".into()));
            }
            let method = match &load.method {
                None => HttpMethod::Get,
                Some(m) => HttpMethod::parse(m)
                    .ok_or_else(|| invalid(format!("unknown loadOptions method '{}'", m)))?,
            };
            Some(DynamicOptions {
                url: load.url.clone(),
                method,
                items_property: load
                    .items_property
                    .clone()
                    .unwrap_or_else(|| "items".to_string()),
            })
        }
    };

    let options = if matches!(property.kind, FieldKind::Enum | FieldKind::Group) {
        property
            .options
            .iter()
            .map(|o| OptionItem {
                label: o.name.clone(),
                value: o.value.clone(),
            })
            .collect()
    } else {
        Vec::new()
    };

    let t = &property.type_options;
    let constraints = Constraints {
        min_value: t.min_value,
        max_value: t.max_value,
        min_length: t.min_length,
        max_length: t.max_length,
        pattern: t.pattern.clone(),
    };

    let check = ConstraintCheck::compile(constraint_schema(
        property,
        &constraints,
        dynamic_options.is_some(),
    ))
    .map_err(invalid)?;

    Ok(FieldDefinition {
        id: property.name.clone(),
        display_name: property.display_name.clone(),
        description: property.description.clone(),
        kind: property.kind,
        channel,
        required: property.required,
        nullable: property.nullable,
        default: property.default.clone(),
        constraints,
        options,
        dynamic_options,
        visibility: Vec::new(),
        expression: None,
        owner: None,
        index,
        selector: false,
        check,
    })
}

/// JSON Schema for a field's raw value: type, static choices, constraints.
fn constraint_schema(property: &PropertySource, constraints: &Constraints, dynamic: bool) -> Value {
    let mut schema = Map::new();

    let base_type = match property.kind {
        FieldKind::String => Some("string"),
        FieldKind::Number => Some("number"),
        FieldKind::Boolean => Some("boolean"),
        FieldKind::Enum | FieldKind::Json | FieldKind::Group => None,
    };
    if let Some(ty) = base_type {
        let ty = if property.nullable {
            json!([ty, "null"])
        } else {
            json!(ty)
        };
        schema.insert("type".to_string(), ty);
    }

    // Dynamic choices are only known at runtime, so those fields take free text.
    if property.kind == FieldKind::Enum && !dynamic && !property.options.is_empty() {
        let mut values: Vec<Value> = property.options.iter().map(|o| o.value.clone()).collect();
        if property.nullable {
            values.push(Value::Null);
        }
        schema.insert("enum".to_string(), Value::Array(values));
    }

    if let Some(v) = constraints.min_value {
        schema.insert("minimum".to_string(), json!(v));
    }
    if let Some(v) = constraints.max_value {
        schema.insert("maximum".to_string(), json!(v));
    }
    if let Some(v) = constraints.min_length {
        schema.insert("minLength".to_string(), json!(v));
    }
    if let Some(v) = constraints.max_length {
        schema.insert("maxLength".to_string(), json!(v));
    }
    if let Some(p) = &constraints.pattern {
        schema.insert("pattern".to_string(), json!(p));
    }

    Value::Object(schema)
}

/// Name lookup within one operation.
struct Scope<'a> {
    operation: &'a str,
    names: BTreeMap<String, Vec<usize>>,
}

impl<'a> Scope<'a> {
    fn new(operation: &'a str, fields: &[FieldDefinition]) -> Self {
        let mut names: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for field in fields {
            names.entry(field.id.clone()).or_default().push(field.index);
        }
        Self { operation, names }
    }

    fn indices(&self, id: &str) -> &[usize] {
        self.names.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Resolve a reference made by `from` to a unique field.
    fn lookup(&self, from: &str, reference: &str) -> Result<FieldRef, SchemaError> {
        match self.indices(reference) {
            [] => Err(SchemaError::UnknownReference {
                operation: self.operation.to_string(),
                field: from.to_string(),
                reference: reference.to_string(),
            }),
            [index] => Ok(FieldRef {
                id: reference.to_string(),
                index: *index,
            }),
            _ => Err(SchemaError::AmbiguousReference {
                operation: self.operation.to_string(),
                field: from.to_string(),
                reference: reference.to_string(),
            }),
        }
    }

    fn conditions(
        &self,
        property: &PropertySource,
        field: &FieldDefinition,
        fields: &[FieldDefinition],
    ) -> Result<Vec<Condition>, SchemaError> {
        let mut conditions = Vec::new();

        for (key, allowed) in &property.display_options.show {
            if key == RESOURCE_FIELD || key == OPERATION_FIELD {
                continue;
            }
            let selector = self.lookup(&field.id, key)?;
            if let Some(tags) = selector_tags(&fields[selector.index]) {
                if let Some(value) = allowed.iter().find(|v| !tags.contains(&tag_text(v))) {
                    return Err(SchemaError::UnreachableVariant {
                        field: field.id.clone(),
                        selector: selector.id.clone(),
                        tag: tag_text(value),
                    });
                }
            }
            conditions.push(Condition {
                selector,
                allowed: allowed.clone(),
            });
        }

        Ok(conditions)
    }

    /// Same-named fields must never be active together.
    fn check_duplicates(&self, fields: &[FieldDefinition]) -> Result<(), SchemaError> {
        for (id, indices) in &self.names {
            for (pos, &a) in indices.iter().enumerate() {
                for &b in &indices[pos + 1..] {
                    if !mutually_exclusive(&fields[a], &fields[b]) {
                        return Err(SchemaError::DuplicateField {
                            operation: self.operation.to_string(),
                            field: id.to_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn expression(
        &self,
        property: &PropertySource,
        index: usize,
        fields: &[FieldDefinition],
    ) -> Result<Option<ValueExpression>, SchemaError> {
        let field = &fields[index];

        if field.kind == FieldKind::Group {
            if property.value_from.is_some() {
                return Err(SchemaError::InvalidField {
                    field: field.id.clone(),
                    message: "variant groups cannot declare valueFrom".into(),
                });
            }
            return Ok(Some(ValueExpression::OneOf(variant_group(
                property, index, fields,
            ))));
        }

        match &property.value_from {
            None => Ok(None),
            Some(ValueFromSource::Compose(bindings)) => {
                let bindings = bindings
                    .iter()
                    .map(|b| {
                        Ok(Binding {
                            field: self.lookup(&field.id, &b.field)?,
                            key: BodyPath::parse(&b.key).map_err(|message| {
                                SchemaError::InvalidPath {
                                    field: field.id.clone(),
                                    message,
                                }
                            })?,
                        })
                    })
                    .collect::<Result<Vec<_>, SchemaError>>()?;
                Ok(Some(ValueExpression::Compose(bindings)))
            }
            Some(ValueFromSource::Switch(switch)) => {
                let selector = self.lookup(&field.id, &switch.selector)?;
                let target = &fields[selector.index];
                if let Some(tags) = selector_tags(target) {
                    if let Some(tag) = switch.cases.keys().find(|t| !tags.contains(t.as_str())) {
                        return Err(SchemaError::UnreachableVariant {
                            field: field.id.clone(),
                            selector: selector.id.clone(),
                            tag: tag.clone(),
                        });
                    }
                }
                Ok(Some(ValueExpression::Switch(TagSwitch {
                    selector,
                    cases: switch
                        .cases
                        .iter()
                        .map(|(tag, value)| (tag.clone(), value.clone()))
                        .collect(),
                })))
            }
        }
    }

    fn cycle_error(&self, fields: &[FieldDefinition], cycle: Vec<usize>) -> SchemaError {
        SchemaError::Cycle {
            operation: self.operation.to_string(),
            fields: cycle.into_iter().map(|i| fields[i].id.clone()).collect(),
        }
    }
}

/// Known values of a selector with a closed value set.
fn selector_tags(field: &FieldDefinition) -> Option<BTreeSet<String>> {
    match field.kind {
        FieldKind::Group => Some(field.options.iter().map(|o| tag_text(&o.value)).collect()),
        FieldKind::Enum if field.dynamic_options.is_none() && !field.options.is_empty() => {
            Some(field.options.iter().map(|o| tag_text(&o.value)).collect())
        }
        FieldKind::Boolean => Some(["true", "false"].iter().map(|s| s.to_string()).collect()),
        _ => None,
    }
}

/// Text form of a selector value, as used for tags and switch cases.
pub(crate) fn tag_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn mutually_exclusive(a: &FieldDefinition, b: &FieldDefinition) -> bool {
    a.visibility.iter().any(|ca| {
        b.visibility.iter().any(|cb| {
            ca.selector.index == cb.selector.index
                && !ca.allowed.iter().any(|v| cb.allowed.contains(v))
        })
    })
}

/// Pick the deepest composite group above each body field.
fn assign_owners(
    fields: &mut [FieldDefinition],
    visibility_order: &[usize],
) -> Result<(), SchemaError> {
    let mut ancestors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); fields.len()];
    for &index in visibility_order {
        let mut set = BTreeSet::new();
        for condition in &fields[index].visibility {
            set.insert(condition.selector.index);
            set.extend(ancestors[condition.selector.index].iter().copied());
        }
        ancestors[index] = set;
    }

    let is_composite = |f: &FieldDefinition| {
        f.kind == FieldKind::Group && matches!(f.channel, Channel::Body(_))
    };

    let mut owners = Vec::with_capacity(fields.len());
    for field in fields.iter() {
        if !matches!(field.channel, Channel::Body(_)) {
            owners.push(None);
            continue;
        }
        let candidates: Vec<usize> = ancestors[field.index]
            .iter()
            .copied()
            .filter(|&a| is_composite(&fields[a]))
            .collect();
        let owner = candidates.iter().copied().find(|&c| {
            candidates
                .iter()
                .all(|&other| other == c || ancestors[c].contains(&other))
        });
        match (candidates.is_empty(), owner) {
            (true, _) => owners.push(None),
            (false, Some(owner)) => owners.push(Some(FieldRef {
                id: fields[owner].id.clone(),
                index: owner,
            })),
            (false, None) => {
                let names: Vec<&str> = candidates.iter().map(|&c| fields[c].id.as_str()).collect();
                return Err(SchemaError::InvalidField {
                    field: field.id.clone(),
                    message: format!("nested under unrelated variant groups: {}", names.join(", ")),
                });
            }
        }
    }

    for (field, owner) in fields.iter_mut().zip(owners) {
        field.owner = owner;
    }
    Ok(())
}

fn variant_group(property: &PropertySource, index: usize, fields: &[FieldDefinition]) -> VariantGroup {
    let owned: Vec<usize> = fields
        .iter()
        .filter(|f| f.owner.as_ref().map(|o| o.index) == Some(index))
        .map(|f| f.index)
        .collect();

    let branches = property
        .options
        .iter()
        .map(|option| {
            let tag = tag_text(&option.value);
            let members = owned
                .iter()
                .copied()
                .filter(|&m| {
                    branch_tags(fields, m, index)
                        .map(|tags| tags.iter().any(|t| t.as_str() == Some(tag.as_str())))
                        .unwrap_or(false)
                })
                .map(|m| FieldRef {
                    id: fields[m].id.clone(),
                    index: m,
                })
                .collect();
            VariantBranch {
                tag,
                label: option.name.clone(),
                members,
            }
        })
        .collect();

    VariantGroup { branches, owned }
}

/// Tags of `group` under which `field` is declared, directly or through
/// its own selectors.
pub(crate) fn branch_tags(fields: &[FieldDefinition], field: usize, group: usize) -> Option<&[Value]> {
    let conditions = &fields[field].visibility;
    if let Some(direct) = conditions.iter().find(|c| c.selector.index == group) {
        return Some(&direct.allowed);
    }
    conditions
        .iter()
        .find_map(|c| branch_tags(fields, c.selector.index, group))
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    New,
    Active,
    Done,
}

/// Dependencies-first order of `deps`, or the first cycle found.
fn topo_order(deps: &[Vec<usize>]) -> Result<Vec<usize>, Vec<usize>> {
    let mut marks = vec![Mark::New; deps.len()];
    let mut order = Vec::with_capacity(deps.len());
    let mut stack = Vec::new();

    for start in 0..deps.len() {
        visit(start, deps, &mut marks, &mut stack, &mut order)?;
    }
    Ok(order)
}

fn visit(
    node: usize,
    deps: &[Vec<usize>],
    marks: &mut [Mark],
    stack: &mut Vec<usize>,
    order: &mut Vec<usize>,
) -> Result<(), Vec<usize>> {
    match marks[node] {
        Mark::Done => return Ok(()),
        Mark::Active => {
            let start = stack.iter().position(|&n| n == node).unwrap_or(0);
            let mut cycle = stack[start..].to_vec();
            cycle.push(node);
            return Err(cycle);
        }
        Mark::New => {}
    }

    marks[node] = Mark::Active;
    stack.push(node);
    for &dep in &deps[node] {
        visit(dep, deps, marks, stack, order)?;
    }
    stack.pop();
    marks[node] = Mark::Done;
    order.push(node);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(properties: Value) -> SchemaSource {
        serde_json::from_value(json!({
            "requestDefaults": { "baseURL": "https://data.example.com" },
            "properties": properties
        }))
        .unwrap()
    }

    fn header() -> Vec<Value> {
        vec![
            json!({
                "name": "resource", "type": "enum",
                "options": [{ "name": "Sources", "value": "sources" }]
            }),
            json!({
                "name": "operation", "type": "enum",
                "displayOptions": { "show": { "resource": ["sources"] } },
                "options": [
                    { "name": "Create", "value": "createSource",
                      "routing": { "request": { "method": "POST", "url": "/1/sources" } } },
                    { "name": "Get", "value": "getSource",
                      "routing": { "request": { "url": "/1/sources/{{ $parameter.sourceID }}" } } }
                ]
            }),
        ]
    }

    fn build(extra: Value) -> Result<FieldRegistry, SchemaError> {
        let mut properties = header();
        properties.extend(extra.as_array().unwrap().iter().cloned());
        FieldRegistry::from_source(&source(Value::Array(properties)))
    }

    fn base_fields() -> Value {
        json!([
            { "name": "sourceID", "type": "string", "required": true,
              "displayOptions": { "show": { "operation": ["getSource"] } },
              "routing": { "send": { "type": "path" } } },
            { "name": "input", "type": "group", "required": true,
              "displayOptions": { "show": { "operation": ["createSource"] } },
              "routing": { "send": { "type": "body", "property": "input" } },
              "options": [
                  { "name": "BigQuery", "value": "source_bigquery" },
                  { "name": "JSON", "value": "source_json" }
              ] },
            { "name": "projectID", "type": "string",
              "displayOptions": { "show": { "input": ["source_bigquery"] } },
              "routing": { "send": { "property": "projectID" } } },
            { "name": "url", "type": "string",
              "displayOptions": { "show": { "input": ["source_json"] } },
              "routing": { "send": { "property": "url" } } }
        ])
    }

    #[test]
    fn scopes_fields_per_operation() {
        let registry = build(base_fields()).unwrap();

        let create = registry.operation("sources", "createSource").unwrap();
        assert_eq!(create.method, HttpMethod::Post);
        let ids: Vec<&str> = create.fields.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["input", "projectID", "url"]);

        let get = registry.operation("sources", "getSource").unwrap();
        assert_eq!(get.method, HttpMethod::Get);
        assert_eq!(get.fields.len(), 1);
        assert_eq!(get.fields[0].channel, Channel::Path);

        assert_eq!(registry.base_url(), Some("https://data.example.com"));
        assert_eq!(registry.resources().collect::<Vec<_>>(), vec!["sources"]);
        assert_eq!(registry.operations().count(), 2);
    }

    #[test]
    fn builds_variant_branches_with_members() {
        let registry = build(base_fields()).unwrap();
        let create = registry.operation("sources", "createSource").unwrap();

        let input = create.field("input").unwrap();
        assert!(input.is_selector());
        let group = input.variant_group().unwrap();
        assert_eq!(group.tags().collect::<Vec<_>>(), vec!["source_bigquery", "source_json"]);
        assert_eq!(group.branch("source_bigquery").unwrap().members[0].id, "projectID");
        assert_eq!(group.branch("source_json").unwrap().members[0].id, "url");

        let url = create.field("url").unwrap();
        assert_eq!(url.owner.as_ref().map(|o| o.id.as_str()), Some("input"));
    }

    #[test]
    fn unknown_show_reference_rejected() {
        let err = build(json!([
            { "name": "x", "type": "string",
              "displayOptions": { "show": { "missing": ["a"] } } }
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            SchemaError::UnknownReference { ref reference, .. } if reference == "missing"
        ));
    }

    #[test]
    fn unreachable_variant_rejected() {
        let mut fields = base_fields();
        fields.as_array_mut().unwrap().push(json!({
            "name": "table", "type": "string",
            "displayOptions": { "show": { "input": ["source_redshift"] } }
        }));
        let err = build(fields).unwrap_err();
        assert!(matches!(
            err,
            SchemaError::UnreachableVariant { ref tag, .. } if tag == "source_redshift"
        ));
    }

    #[test]
    fn duplicate_variant_tag_rejected() {
        let err = build(json!([
            { "name": "g", "type": "group",
              "options": [
                  { "name": "A", "value": "a" },
                  { "name": "A again", "value": "a" }
              ] }
        ]))
        .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateVariant { .. }));
    }

    #[test]
    fn visibility_cycle_rejected() {
        let err = build(json!([
            { "name": "a", "type": "boolean", "displayOptions": { "show": { "b": [true] } } },
            { "name": "b", "type": "boolean", "displayOptions": { "show": { "a": [true] } } }
        ]))
        .unwrap_err();
        match err {
            SchemaError::Cycle { fields, .. } => assert_eq!(fields, vec!["a", "b", "a"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn compose_cycle_rejected() {
        let err = build(json!([
            { "name": "a", "type": "json", "valueFrom": { "compose": [{ "field": "b", "key": "b" }] } },
            { "name": "b", "type": "json", "valueFrom": { "compose": [{ "field": "a", "key": "a" }] } }
        ]))
        .unwrap_err();
        assert!(matches!(err, SchemaError::Cycle { .. }));
    }

    #[test]
    fn duplicate_names_need_exclusive_visibility() {
        // Same id under two branches of one group is fine.
        let mut fields = base_fields();
        fields.as_array_mut().unwrap().push(json!({
            "name": "projectID", "type": "string",
            "displayOptions": { "show": { "input": ["source_json"] } }
        }));
        assert!(build(fields).is_ok());

        // Same id visible at the same time is not.
        let err = build(json!([
            { "name": "x", "type": "string" },
            { "name": "x", "type": "number" }
        ]))
        .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateField { .. }));
    }

    #[test]
    fn unknown_placeholder_rejected() {
        // getSource's URL uses sourceID but no path field declares it.
        let err = build(json!([])).unwrap_err();
        assert!(matches!(
            err,
            SchemaError::UnknownPlaceholder { ref placeholder, .. } if placeholder == "sourceID"
        ));
    }

    #[test]
    fn constraint_schema_compiled_at_build() {
        let mut fields = base_fields();
        fields.as_array_mut().unwrap().push(json!({
            "name": "method", "type": "enum", "nullable": true,
            "displayOptions": { "show": { "input": ["source_json"] } },
            "typeOptions": { "minLength": 3 },
            "options": [{ "name": "GET", "value": "GET" }, { "name": "POST", "value": "POST" }],
            "routing": { "send": { "property": "method" } }
        }));
        let registry = build(fields).unwrap();
        let field = registry
            .operation("sources", "createSource")
            .unwrap()
            .field("method")
            .unwrap();

        assert_eq!(field.check.schema()["enum"], json!(["GET", "POST", null]));
        assert_eq!(field.check.schema()["minLength"], json!(3));
        assert!(field.check.errors(&json!("POST")).is_empty());
        assert!(field.check.errors(&Value::Null).is_empty());
        assert_eq!(field.check.errors(&json!("PUT")).len(), 1);
    }

    #[test]
    fn invalid_body_path_rejected() {
        let mut fields = base_fields();
        fields.as_array_mut().unwrap().push(json!({
            "name": "broken", "type": "string",
            "routing": { "send": { "type": "body", "property": "a..b" } }
        }));
        let err = build(fields).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidPath { .. }));
    }

    #[test]
    fn invalid_pattern_rejected_at_load() {
        let mut fields = base_fields();
        fields.as_array_mut().unwrap().push(json!({
            "name": "code", "type": "string",
            "typeOptions": { "pattern": "([a-z" }
        }));
        let err = build(fields).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidField { ref field, .. } if field == "code"));
    }

    #[test]
    fn missing_tables_rejected() {
        let err = FieldRegistry::from_source(&source(json!([]))).unwrap_err();
        assert!(matches!(err, SchemaError::MissingResources));

        let err = FieldRegistry::from_source(&source(json!([
            { "name": "resource", "type": "enum", "options": [{ "name": "A", "value": "a" }] }
        ])))
        .unwrap_err();
        assert!(matches!(err, SchemaError::MissingOperations));
    }

    #[test]
    fn nested_groups_own_their_members() {
        let mut fields = base_fields();
        fields.as_array_mut().unwrap().extend([
            json!({
                "name": "partition", "type": "group",
                "displayOptions": { "show": { "input": ["source_bigquery"] } },
                "routing": { "send": { "property": "partition" } },
                "options": [
                    { "name": "By time", "value": "partition_time" },
                    { "name": "None", "value": "partition_none" }
                ]
            }),
            json!({
                "name": "partitionField", "type": "string",
                "displayOptions": { "show": { "partition": ["partition_time"] } },
                "routing": { "send": { "property": "field" } }
            }),
        ]);
        let registry = build(fields).unwrap();
        let create = registry.operation("sources", "createSource").unwrap();

        let field = create.field("partitionField").unwrap();
        assert_eq!(field.owner.as_ref().unwrap().id, "partition");
        let partition = create.field("partition").unwrap();
        assert_eq!(partition.owner.as_ref().unwrap().id, "input");

        let input = create.field("input").unwrap().variant_group().unwrap();
        let members: Vec<&str> = input
            .branch("source_bigquery")
            .unwrap()
            .members
            .iter()
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(members, vec!["projectID", "partition"]);
    }

    #[test]
    fn topo_order_puts_dependencies_first() {
        let deps = vec![vec![2], vec![], vec![1]];
        assert_eq!(topo_order(&deps).unwrap(), vec![1, 2, 0]);
    }
}
