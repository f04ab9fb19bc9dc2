//! Data entry flow results
//!
//! A flow step either shows a form, creates an entry or aborts. Forms carry
//! a [`DataSchema`] which also validates what the user submits back.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Submitted or accumulated flow values, keyed by field name
pub type FlowData = HashMap<String, serde_json::Value>;

/// What a flow step produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowResultType {
    Form,
    CreateEntry,
    Abort,
}

/// Result type for a flow step
#[derive(Debug, Clone, Serialize)]
pub struct FlowResult {
    /// Flow ID, assigned by the flow manager
    pub flow_id: String,
    /// Handler (integration domain), assigned by the flow manager
    pub handler: String,
    #[serde(rename = "type")]
    pub result_type: FlowResultType,
    /// Current step ID (for form type)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    /// Data schema for the form, empty if no schema
    pub data_schema: DataSchema,
    /// Errors from the previous submission
    pub errors: Option<HashMap<String, String>>,
    /// Description placeholders for the form
    pub description_placeholders: Option<HashMap<String, String>>,
    /// Title (for create_entry type)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Abort reason (for abort type)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Entry data (config flow) or new options (options flow)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<FlowData>,
    /// Entry schema version (for create_entry)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    /// Unique id the created entry should carry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
    /// Whether this is the last step
    pub last_step: Option<bool>,
}

impl FlowResult {
    fn empty(result_type: FlowResultType) -> Self {
        Self {
            flow_id: String::new(),
            handler: String::new(),
            result_type,
            step_id: None,
            data_schema: DataSchema::default(),
            errors: None,
            description_placeholders: None,
            title: None,
            reason: None,
            data: None,
            version: None,
            unique_id: None,
            last_step: None,
        }
    }

    /// Show a form for `step_id`
    pub fn form(step_id: impl Into<String>, data_schema: DataSchema) -> Self {
        Self {
            step_id: Some(step_id.into()),
            data_schema,
            ..Self::empty(FlowResultType::Form)
        }
    }

    /// Finish the flow with a new entry (or new options)
    pub fn create_entry(title: impl Into<String>, data: FlowData) -> Self {
        Self {
            title: Some(title.into()),
            data: Some(data),
            ..Self::empty(FlowResultType::CreateEntry)
        }
    }

    /// Finish the flow without creating anything
    pub fn abort(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::empty(FlowResultType::Abort)
        }
    }

    pub fn with_errors(mut self, errors: HashMap<String, String>) -> Self {
        self.errors = Some(errors);
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = Some(unique_id.into());
        self
    }

    /// create_entry and abort end the flow
    pub fn is_terminal(&self) -> bool {
        self.result_type != FlowResultType::Form
    }
}

/// Kind of value a form field accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Boolean,
    Select,
}

/// Form field schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    /// Allowed values of a select field
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<serde_json::Value>,
}

impl FormField {
    /// A field that must be present (and non-empty, for strings)
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
            default: None,
            options: Vec::new(),
        }
    }

    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            required: false,
            ..Self::required(name, field_type)
        }
    }

    /// A required choice among `options`
    pub fn select(name: impl Into<String>, options: Vec<serde_json::Value>) -> Self {
        Self {
            options,
            ..Self::required(name, FieldType::Select)
        }
    }

    /// Pre-fill the field; also used when a submission leaves it out
    pub fn with_default(mut self, default: Option<serde_json::Value>) -> Self {
        self.default = default;
        self
    }

    fn check(&self, value: &serde_json::Value) -> Result<serde_json::Value, &'static str> {
        use serde_json::Value;

        match self.field_type {
            FieldType::String => match value {
                Value::String(s) if self.required && s.trim().is_empty() => Err("required"),
                Value::String(_) => Ok(value.clone()),
                _ => Err("invalid"),
            },
            FieldType::Boolean => match value {
                Value::Bool(_) => Ok(value.clone()),
                _ => Err("invalid"),
            },
            FieldType::Select => self
                .options
                .iter()
                .find(|option| select_matches(option, value))
                .cloned()
                .ok_or("invalid"),
        }
    }
}

/// A select option matches its own JSON value or that value's string form,
/// so `"3.3"` selects the option `3.3`.
fn select_matches(option: &serde_json::Value, value: &serde_json::Value) -> bool {
    if option == value {
        return true;
    }
    match (option, value) {
        (serde_json::Value::Number(n), serde_json::Value::String(s)) => {
            match (n.as_f64(), s.trim().parse::<f64>()) {
                (Some(a), Ok(b)) => a == b,
                _ => false,
            }
        }
        (serde_json::Value::Number(a), serde_json::Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => false,
    }
}

/// Submitted values that do not fit the schema, keyed by field name
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid user input: {errors:?}")]
pub struct SchemaError {
    pub errors: HashMap<String, String>,
}

/// Ordered set of form fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataSchema {
    fields: Vec<FormField>,
}

impl DataSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: FormField) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fields(&self) -> &[FormField] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&FormField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Validate a submission.
    ///
    /// Missing fields take their default. Keys the schema does not know are
    /// dropped. Select values are normalised to the matching option.
    pub fn validate(&self, input: &FlowData) -> Result<FlowData, SchemaError> {
        let mut output = FlowData::new();
        let mut errors = HashMap::new();

        for field in &self.fields {
            let value = input.get(&field.name).or(field.default.as_ref());
            match value {
                Some(value) => match field.check(value) {
                    Ok(value) => {
                        output.insert(field.name.clone(), value);
                    }
                    Err(error) => {
                        errors.insert(field.name.clone(), error.to_string());
                    }
                },
                None if field.required => {
                    errors.insert(field.name.clone(), "required".to_string());
                }
                None => {}
            }
        }

        if errors.is_empty() {
            Ok(output)
        } else {
            Err(SchemaError { errors })
        }
    }
}
