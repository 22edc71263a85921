//! Field documentation for components.
//!
//! A [`ComponentSpec`] describes the options a component implementation
//! accepts. The [`crate::lint::SchemaLinter`] checks resource files against
//! these specs before anything is built.

use serde_yaml::Value;

/// Expected type of an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
  /// A string.
  String,
  /// An integer.
  Int,
  /// Any number.
  Float,
  /// A boolean.
  Bool,
  /// A duration string such as `"5s"`.
  Duration,
  /// A list.
  Array,
  /// A mapping.
  Object,
  /// Anything.
  Any,
}

impl FieldType {
  /// Name used in lint messages.
  pub fn as_str(&self) -> &'static str {
    match self {
      FieldType::String => "string",
      FieldType::Int => "int",
      FieldType::Float => "float",
      FieldType::Bool => "bool",
      FieldType::Duration => "duration",
      FieldType::Array => "array",
      FieldType::Object => "object",
      FieldType::Any => "any",
    }
  }

  /// True if `value` is acceptable for this type.
  pub fn accepts(&self, value: &Value) -> bool {
    match self {
      FieldType::String => matches!(value, Value::String(_)),
      FieldType::Int => value.as_i64().is_some() || value.as_u64().is_some(),
      FieldType::Float => value.is_number(),
      FieldType::Bool => value.is_bool(),
      FieldType::Duration => value
        .as_str()
        .is_some_and(|s| crate::config::duration::parse_duration(s).is_ok()),
      FieldType::Array => value.is_sequence(),
      FieldType::Object => value.is_mapping(),
      FieldType::Any => true,
    }
  }
}

/// One documented option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
  /// Option name.
  pub name: String,
  /// Expected type.
  pub field_type: FieldType,
  /// One-line description.
  pub description: String,
  /// Whether the option may be omitted.
  pub optional: bool,
}

impl FieldSpec {
  /// A required option of type `field_type`.
  pub fn new(name: impl Into<String>, field_type: FieldType, description: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      field_type,
      description: description.into(),
      optional: false,
    }
  }

  /// A required string option.
  pub fn string(name: impl Into<String>, description: impl Into<String>) -> Self {
    Self::new(name, FieldType::String, description)
  }

  /// A required integer option.
  pub fn int(name: impl Into<String>, description: impl Into<String>) -> Self {
    Self::new(name, FieldType::Int, description)
  }

  /// A required boolean option.
  pub fn bool(name: impl Into<String>, description: impl Into<String>) -> Self {
    Self::new(name, FieldType::Bool, description)
  }

  /// A required duration option.
  pub fn duration(name: impl Into<String>, description: impl Into<String>) -> Self {
    Self::new(name, FieldType::Duration, description)
  }

  /// A required list option.
  pub fn array(name: impl Into<String>, description: impl Into<String>) -> Self {
    Self::new(name, FieldType::Array, description)
  }

  /// A required mapping option.
  pub fn object(name: impl Into<String>, description: impl Into<String>) -> Self {
    Self::new(name, FieldType::Object, description)
  }

  /// Marks the option as optional.
  #[must_use]
  pub fn optional(mut self) -> Self {
    self.optional = true;
    self
  }
}

/// Documentation of one component implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentSpec {
  /// Implementation name as written in config.
  pub name: String,
  /// One-line summary.
  pub summary: String,
  /// Accepted options.
  pub fields: Vec<FieldSpec>,
  /// Skip unknown-field and type checks for this component.
  pub lenient: bool,
}

impl ComponentSpec {
  /// A spec with no options.
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      summary: String::new(),
      fields: Vec::new(),
      lenient: false,
    }
  }

  /// Sets the summary.
  pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
    self.summary = summary.into();
    self
  }

  /// Adds an option.
  pub fn with_field(mut self, field: FieldSpec) -> Self {
    self.fields.push(field);
    self
  }

  /// Accepts any options without checking them.
  pub fn lenient(mut self) -> Self {
    self.lenient = true;
    self
  }

  /// Looks an option up by name.
  pub fn field(&self, name: &str) -> Option<&FieldSpec> {
    self.fields.iter().find(|f| f.name == name)
  }
}
