use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// The request being evaluated: who (`subject`) wants to do what (`action`)
/// on which target (`resource`), under which circumstances (`context`).
///
/// Subject, action and resource are each either a plain string or an
/// attribute map (string keys, scalar values). An inquiry is an immutable
/// value object created once per request; the engine never mutates it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Inquiry {
    #[serde(default)]
    pub subject: Value,
    #[serde(default)]
    pub action: Value,
    #[serde(default)]
    pub resource: Value,
    #[serde(default)]
    pub context: HashMap<String, Value>,
}

impl Inquiry {
    pub fn new(
        subject: impl Into<Value>,
        action: impl Into<Value>,
        resource: impl Into<Value>,
    ) -> Self {
        Self {
            subject: subject.into(),
            action: action.into(),
            resource: resource.into(),
            context: HashMap::new(),
        }
    }

    /// Attach a context entry (builder style, used at construction time).
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn from_json(json: &str) -> crate::error::WardenResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| crate::error::WardenError::Deserialization(e.to_string()))
    }

    pub fn to_json(&self) -> crate::error::WardenResult<String> {
        serde_json::to_string(self)
            .map_err(|e| crate::error::WardenError::Serialization(e.to_string()))
    }
}
