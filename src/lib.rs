//! oneof-routing
//!
//! Resolution of discriminated-union field schemas into concrete HTTP requests.
//!
//! A schema source declares resources, operations and their fields as a flat
//! property table. Fields nest through `displayOptions.show` predicates, and
//! `group` fields host mutually exclusive variants whose members are composed
//! into a single nested body object. Given a discriminant (resource, operation
//! and variant selections) and raw user inputs, the engine validates the
//! active fields, resolves their values and assembles the request.
//!
//! # Example
//!
//! ```
//! use oneof_routing::{build_request, load_registry_str, Discriminant, RawInputs};
//! use serde_json::json;
//!
//! let registry = load_registry_str(r#"{
//!     "requestDefaults": { "baseURL": "https://data.example.com" },
//!     "properties": [
//!         { "name": "resource", "type": "enum",
//!           "options": [{ "name": "Authentications", "value": "authentications" }] },
//!         { "name": "operation", "type": "enum",
//!           "options": [{ "name": "Create", "value": "createAuthentication",
//!                         "routing": { "request": { "method": "POST", "url": "/1/authentications" } } }] },
//!         { "name": "input", "type": "group", "required": true,
//!           "routing": { "send": { "property": "input" } },
//!           "options": [
//!               { "name": "Basic", "value": "auth_basic" },
//!               { "name": "API key", "value": "auth_apikey" }
//!           ] },
//!         { "name": "username", "type": "string",
//!           "displayOptions": { "show": { "input": ["auth_basic"] } },
//!           "routing": { "send": { "property": "username" } } },
//!         { "name": "key", "type": "string",
//!           "displayOptions": { "show": { "input": ["auth_apikey"] } },
//!           "routing": { "send": { "property": "key" } } }
//!     ]
//! }"#).unwrap();
//!
//! let discriminant = Discriminant::new("authentications", "createAuthentication")
//!     .select("input", "auth_basic");
//! let mut inputs = RawInputs::new();
//! inputs.insert("username".into(), json!("admin"));
//! // Belongs to the other variant, so it never reaches the request.
//! inputs.insert("key".into(), json!("ignored"));
//!
//! let request = build_request(&registry, &discriminant, &inputs).unwrap();
//! assert_eq!(request.url, "https://data.example.com/1/authentications");
//! assert_eq!(request.body, Some(json!({ "input": { "username": "admin" } })));
//! ```
//!
//! # Pipeline
//!
//! | Stage | Function | Output |
//! |-------|----------|--------|
//! | load | [`load_registry`] | [`FieldRegistry`], or a `SchemaError` for defective schemas |
//! | visibility | [`active_fields_with_inputs`] | [`ActiveFields`] for the discriminant and inputs |
//! | validation | [`validate`] | every [`FieldIssue`] at once |
//! | resolution | [`resolve`] | [`ResolvedValues`] |
//! | assembly | [`assemble`] | [`ResolvedRequest`] |
//!
//! [`build_request`] runs the last four stages; [`build_batch`] runs many
//! invocations in parallel against one shared registry.

mod assembler;
mod engine;
mod error;
mod linter;
mod loader;
mod options;
mod path;
mod registry;
mod resolver;
mod types;
mod validator;
mod visibility;

pub use assembler::assemble;
pub use engine::{build_batch, build_request, Invocation};
pub use error::{FieldIssue, LoadError, ResolveError, SchemaError, TransportError};
pub use linter::{
    lint, lint_file, Diagnostic, FileResult, FileStatus, LintCode, LintResult, Severity,
};
pub use loader::{
    is_url, load_registry, load_registry_str, load_source, load_source_auto, load_source_str,
    source_from_value,
};
pub use options::{field_choices, items_from_response, FieldChoices, OptionLoader};
pub use path::{BodyPath, PathSegment, UrlSegment, UrlTemplate};
pub use registry::{
    Binding, BindingSource, Channel, Condition, DisplayOptions, DynamicOptions, FieldDefinition,
    FieldRef, FieldRegistry, LoadOptionsSource, OperationSchema, OptionSource, PropertySource,
    RequestDefaults, RequestSource, RoutingSource, SchemaSource, SendChannel, SendSource,
    SwitchSource, TagSwitch, TypeOptions, ValueExpression, ValueFromSource, VariantBranch,
    VariantGroup,
};
pub use resolver::{resolve, ResolvedValues};
pub use types::{
    Constraints, Discriminant, FieldKind, HttpMethod, OptionItem, QueryEncoding, RawInputs,
    ResolvedRequest,
};
pub use validator::{collect_issues, validate};
pub use visibility::{active_fields, active_fields_with_inputs, selector_value, ActiveFields};

#[cfg(feature = "remote")]
pub use loader::load_source_url;
#[cfg(feature = "remote")]
pub use options::HttpOptionLoader;
