//! Adapters from host entity states to the values the coordinator consumes.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

/// State of one host entity: the primary state string plus its attributes.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EntityState {
    pub state: String,
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
}

impl EntityState {
    pub fn new(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute_f32(&self, key: &str) -> Option<f32> {
        let number = match self.attributes.get(key)? {
            Value::Number(number) => number.as_f64()?,
            Value::String(text) => text.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        let number = number as f32;
        number.is_finite().then_some(number)
    }
}

/// A state-changed notification. `new_state` is absent when the entity was
/// removed or has not reported yet.
#[derive(Debug, Clone, Deserialize)]
pub struct StateChangedEvent {
    pub entity_id: String,
    #[serde(default)]
    pub new_state: Option<EntityState>,
}

/// Anything that can be read as an on/off signal.
pub trait BooleanSignalSource {
    fn is_active(&self) -> bool;
}

impl BooleanSignalSource for EntityState {
    fn is_active(&self) -> bool {
        let primary = matches!(self.state.as_str(), "on" | "true" | "1");
        primary || self.attributes.get("is_on").is_some_and(is_truthy)
    }
}

impl BooleanSignalSource for bool {
    fn is_active(&self) -> bool {
        *self
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
        Value::Null => false,
    }
}

/// Temperatures reported by the climate device, each optional.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClimateReading {
    pub current_temperature: Option<f32>,
    pub target_temperature: Option<f32>,
    pub min_temp: Option<f32>,
    pub max_temp: Option<f32>,
    pub target_temp_step: Option<f32>,
}

impl ClimateReading {
    pub fn new(current_temperature: f32, target_temperature: f32) -> Self {
        Self {
            current_temperature: Some(current_temperature),
            target_temperature: Some(target_temperature),
            ..Self::default()
        }
    }
}

impl From<&EntityState> for ClimateReading {
    fn from(state: &EntityState) -> Self {
        Self {
            current_temperature: state.attribute_f32("current_temperature"),
            target_temperature: state.attribute_f32("temperature"),
            min_temp: state.attribute_f32("min_temp"),
            max_temp: state.attribute_f32("max_temp"),
            target_temp_step: state.attribute_f32("target_temp_step"),
        }
    }
}
