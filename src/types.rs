use serde_json::{json, Map, Value};
use thiserror::Error;

/// Simple type system for flow requests and responses.
#[derive(Debug, Clone)]
pub enum TypeDef {
    Text,
    Number { min: Option<f64>, max: Option<f64> },
    Enum(&'static [&'static str]),
    /// A string holding a base64 `data:` URI.
    DataUri,
    List(Box<TypeDef>),
    Object(Vec<FieldDef>),
}

impl TypeDef {
    pub const fn number() -> Self {
        TypeDef::Number { min: None, max: None }
    }

    pub const fn number_in(min: f64, max: f64) -> Self {
        TypeDef::Number {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn list(inner: TypeDef) -> Self {
        TypeDef::List(Box::new(inner))
    }
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: &'static str,
    pub ty: TypeDef,
    pub required: bool,
    /// Steers the hosted model; rendered into prompts and response schemas.
    pub description: &'static str,
}

impl FieldDef {
    pub fn required(name: &'static str, ty: TypeDef, description: &'static str) -> Self {
        Self {
            name,
            ty,
            required: true,
            description,
        }
    }

    pub fn optional(name: &'static str, ty: TypeDef, description: &'static str) -> Self {
        Self {
            name,
            ty,
            required: false,
            description,
        }
    }
}

/// Single validation error, with a JSON path.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Missing required field at path {path}")]
    MissingField { path: String },
    #[error("Type mismatch at {path}: expected {expected}, found {found}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("Value at {path} must be one of [{}], found {found:?}", .allowed.join(", "))]
    NotInEnum {
        path: String,
        allowed: &'static [&'static str],
        found: String,
    },
    #[error("Value at {path} is out of range: {value} not in [{}, {}]", fmt_bound(.min), fmt_bound(.max))]
    OutOfRange {
        path: String,
        value: f64,
        min: Option<f64>,
        max: Option<f64>,
    },
    #[error("Invalid data URI at {path}: {reason}")]
    InvalidDataUri { path: String, reason: String },
    #[error("Invalid value at {path}: {reason}")]
    Invalid { path: String, reason: String },
}

fn fmt_bound(bound: &Option<f64>) -> String {
    bound.map_or_else(|| "..".to_string(), |b| b.to_string())
}

impl ValidationError {
    pub fn path(&self) -> &str {
        match self {
            ValidationError::MissingField { path }
            | ValidationError::TypeMismatch { path, .. }
            | ValidationError::NotInEnum { path, .. }
            | ValidationError::OutOfRange { path, .. }
            | ValidationError::InvalidDataUri { path, .. }
            | ValidationError::Invalid { path, .. } => path,
        }
    }
}

/// Validate a serde_json::Value against a TypeDef.
///
/// Returns Ok(()) if everything matches, or Err(vec![]) with every error found.
pub fn validate(ty: &TypeDef, value: &Value) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    validate_inner(ty, value, "$", &mut errors);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_inner(ty: &TypeDef, value: &Value, path: &str, errors: &mut Vec<ValidationError>) {
    use TypeDef::*;

    match ty {
        Text => {
            if !value.is_string() {
                errors.push(mismatch(path, "string", value));
            }
        }
        Number { min, max } => {
            let Some(n) = value.as_f64() else {
                errors.push(mismatch(path, "number", value));
                return;
            };
            let below = min.is_some_and(|m| n < m);
            let above = max.is_some_and(|m| n > m);
            if below || above {
                errors.push(ValidationError::OutOfRange {
                    path: path.to_string(),
                    value: n,
                    min: *min,
                    max: *max,
                });
            }
        }
        Enum(allowed) => {
            let Some(s) = value.as_str() else {
                errors.push(mismatch(path, "string", value));
                return;
            };
            if !allowed.contains(&s) {
                errors.push(ValidationError::NotInEnum {
                    path: path.to_string(),
                    allowed: *allowed,
                    found: s.to_string(),
                });
            }
        }
        DataUri => {
            let Some(s) = value.as_str() else {
                errors.push(mismatch(path, "string", value));
                return;
            };
            if let Err(e) = crate::media::DataUri::parse(s) {
                errors.push(ValidationError::InvalidDataUri {
                    path: path.to_string(),
                    reason: e.to_string(),
                });
            }
        }
        List(inner) => {
            if let Value::Array(items) = value {
                for (idx, item) in items.iter().enumerate() {
                    let child_path = format!("{path}[{idx}]");
                    validate_inner(inner, item, &child_path, errors);
                }
            } else {
                errors.push(mismatch(path, "array", value));
            }
        }
        Object(fields) => {
            let Some(obj) = value.as_object() else {
                errors.push(mismatch(path, "object", value));
                return;
            };

            for field in fields {
                let field_path = format!("{path}.{}", field.name);

                match obj.get(field.name) {
                    None | Some(Value::Null) if field.required => {
                        errors.push(ValidationError::MissingField { path: field_path });
                    }
                    None | Some(Value::Null) => {}
                    Some(v) => validate_inner(&field.ty, v, &field_path, errors),
                }
            }

            // Extra fields are ignored.
        }
    }
}

fn mismatch(path: &str, expected: &'static str, found: &Value) -> ValidationError {
    ValidationError::TypeMismatch {
        path: path.to_string(),
        expected,
        found: value_type_name(found),
    }
}

fn value_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Human-readable schema description for text-only prompts.
pub fn describe_schema(ty: &TypeDef, indent: usize) -> String {
    let pad = " ".repeat(indent);
    match ty {
        TypeDef::Object(fields) => {
            let mut s = format!("{pad}- object with fields:\n");
            for f in fields {
                let req = if f.required { "required" } else { "optional" };
                s.push_str(&format!(
                    "{pad}  - {} ({}, {}): {}\n",
                    f.name,
                    type_label(&f.ty),
                    req,
                    f.description
                ));
                match &f.ty {
                    TypeDef::Object(_) => s.push_str(&describe_schema(&f.ty, indent + 4)),
                    TypeDef::List(inner) if matches!(**inner, TypeDef::Object(_)) => {
                        s.push_str(&describe_schema(inner, indent + 4));
                    }
                    _ => {}
                }
            }
            s
        }
        TypeDef::List(inner) => {
            let mut s = format!("{pad}- array of:\n");
            s.push_str(&describe_schema(inner, indent + 2));
            s
        }
        other => format!("{pad}- {}\n", type_label(other)),
    }
}

fn type_label(ty: &TypeDef) -> String {
    match ty {
        TypeDef::Text => "string".to_string(),
        TypeDef::Number { min: Some(lo), max: Some(hi) } => format!("number between {lo} and {hi}"),
        TypeDef::Number { min: Some(lo), max: None } => format!("number >= {lo}"),
        TypeDef::Number { .. } => "number".to_string(),
        TypeDef::Enum(allowed) => format!("one of {}", allowed.join("|")),
        TypeDef::DataUri => "base64 data URI".to_string(),
        TypeDef::List(inner) => match **inner {
            TypeDef::Object(_) => "array of objects".to_string(),
            ref scalar => format!("array of {}", type_label(scalar)),
        },
        TypeDef::Object(_) => "object".to_string(),
    }
}

/// Structured-output schema in the OpenAPI subset hosted backends accept.
pub fn to_response_schema(ty: &TypeDef) -> Value {
    schema_node(ty, None)
}

fn schema_node(ty: &TypeDef, description: Option<&str>) -> Value {
    let mut node = match ty {
        TypeDef::Text | TypeDef::DataUri => json!({ "type": "STRING" }),
        TypeDef::Number { min, max } => {
            let mut n = json!({ "type": "NUMBER" });
            if let Some(lo) = min {
                n["minimum"] = json!(lo);
            }
            if let Some(hi) = max {
                n["maximum"] = json!(hi);
            }
            n
        }
        TypeDef::Enum(allowed) => json!({ "type": "STRING", "enum": allowed }),
        TypeDef::List(inner) => json!({ "type": "ARRAY", "items": schema_node(inner, None) }),
        TypeDef::Object(fields) => {
            let mut properties = Map::new();
            for f in fields {
                properties.insert(f.name.to_string(), schema_node(&f.ty, Some(f.description)));
            }
            let required: Vec<&str> = fields.iter().filter(|f| f.required).map(|f| f.name).collect();
            json!({ "type": "OBJECT", "properties": properties, "required": required })
        }
    };
    if let Some(d) = description {
        node["description"] = json!(d);
    }
    node
}
