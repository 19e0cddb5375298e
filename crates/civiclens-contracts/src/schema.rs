use serde_json::{json, Map, Value};

use crate::issue::Severity;

/// One declared shape shared by request building and response validation, so
/// the contract sent to the service and the contract enforced on the way back
/// can never drift apart.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaSpec {
    pub fields: Vec<FieldSpec>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// Free text, required non-empty.
    Text,
    /// Numeric scalar.
    Number,
    /// Text constrained to a closed label set.
    Label { allowed: Vec<String> },
}

impl FieldSpec {
    pub fn text(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: FieldKind::Text,
        }
    }

    pub fn number(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: FieldKind::Number,
        }
    }

    pub fn label(name: &str, allowed: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            kind: FieldKind::Label {
                allowed: allowed.iter().map(|item| (*item).to_string()).collect(),
            },
        }
    }
}

impl SchemaSpec {
    pub fn object(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }

    /// Wire form of the declared shape (`responseSchema` in the generation
    /// config). Every declared field is required.
    pub fn response_schema_value(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for field in &self.fields {
            let descriptor = match &field.kind {
                FieldKind::Text => json!({ "type": "STRING" }),
                FieldKind::Number => json!({ "type": "NUMBER" }),
                FieldKind::Label { allowed } => json!({
                    "type": "STRING",
                    "enum": allowed,
                }),
            };
            properties.insert(field.name.clone(), descriptor);
            required.push(Value::String(field.name.clone()));
        }
        json!({
            "type": "OBJECT",
            "properties": properties,
            "required": required,
        })
    }

    /// Validates a decoded payload against the declared shape. The field set
    /// is closed: missing fields, type mismatches, out-of-set labels, and
    /// undeclared keys all fail.
    pub fn validate(&self, payload: &Value) -> Result<(), String> {
        let Some(object) = payload.as_object() else {
            return Err("payload is not a JSON object".to_string());
        };

        for field in &self.fields {
            let Some(value) = object.get(&field.name) else {
                return Err(format!("missing required field '{}'", field.name));
            };
            match &field.kind {
                FieldKind::Text => {
                    let Some(text) = value.as_str() else {
                        return Err(format!("field '{}' is not a string", field.name));
                    };
                    if text.trim().is_empty() {
                        return Err(format!("field '{}' is empty", field.name));
                    }
                }
                FieldKind::Number => {
                    if value.as_f64().is_none() {
                        return Err(format!("field '{}' is not a number", field.name));
                    }
                }
                FieldKind::Label { allowed } => {
                    let Some(label) = value.as_str() else {
                        return Err(format!("field '{}' is not a string", field.name));
                    };
                    if !allowed.iter().any(|item| item == label.trim()) {
                        return Err(format!(
                            "field '{}' has label '{}' outside the declared set",
                            field.name, label
                        ));
                    }
                }
            }
        }

        for key in object.keys() {
            if !self.fields.iter().any(|field| &field.name == key) {
                return Err(format!("undeclared field '{key}' in payload"));
            }
        }

        Ok(())
    }
}

/// The classifier's declared output shape.
pub fn analysis_schema() -> SchemaSpec {
    let severity_labels: Vec<&str> = Severity::ALL.iter().map(Severity::as_str).collect();
    SchemaSpec::object(vec![
        FieldSpec::text("issue_type"),
        FieldSpec::label("severity", &severity_labels),
        FieldSpec::number("confidence"),
        FieldSpec::text("description"),
        FieldSpec::text("recommended_action"),
    ])
}
