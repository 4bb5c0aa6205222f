use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::{
    error::{Result, SetbackError},
    topics::{TOPIC_CMD_SET_TEMPERATURE, TOPIC_STATE_CHANGED},
    types::friendly_name,
};

pub const DEFAULT_SETBACK_TEMPERATURE: f32 = 16.0;
pub const DEFAULT_NORMAL_TEMPERATURE: f32 = 20.0;
pub const DEFAULT_TEMPERATURE_MIN: f32 = 5.0;
pub const DEFAULT_TEMPERATURE_MAX: f32 = 35.0;
pub const DEFAULT_TEMPERATURE_STEP: f32 = 0.5;

/// What happens to a pending recovery measurement when setback is re-entered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryPolicy {
    /// Leave the measurement pending. Readings cannot complete it while in
    /// setback, and the next end of setback restarts it.
    #[default]
    Keep,
    /// Drop the measurement as soon as setback is re-entered.
    Cancel,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoordinatorConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub climate_device: String,
    pub schedule_device: String,
    #[serde(default)]
    pub binary_input: Option<String>,
    #[serde(default)]
    pub recovery_policy: RecoveryPolicy,
    #[serde(default = "default_enforce_target")]
    pub enforce_target: bool,
    #[serde(default = "default_temperature_min")]
    pub setback_temperature_min: f32,
    #[serde(default = "default_temperature_max")]
    pub setback_temperature_max: f32,
}

fn default_enforce_target() -> bool {
    true
}

fn default_temperature_min() -> f32 {
    DEFAULT_TEMPERATURE_MIN
}

fn default_temperature_max() -> f32 {
    DEFAULT_TEMPERATURE_MAX
}

impl CoordinatorConfig {
    pub fn new(climate_device: impl Into<String>, schedule_device: impl Into<String>) -> Self {
        Self {
            name: None,
            climate_device: climate_device.into(),
            schedule_device: schedule_device.into(),
            binary_input: None,
            recovery_policy: RecoveryPolicy::default(),
            enforce_target: default_enforce_target(),
            setback_temperature_min: DEFAULT_TEMPERATURE_MIN,
            setback_temperature_max: DEFAULT_TEMPERATURE_MAX,
        }
    }

    pub fn with_binary_input(mut self, entity_id: impl Into<String>) -> Self {
        self.binary_input = Some(entity_id.into());
        self
    }

    pub fn with_recovery_policy(mut self, policy: RecoveryPolicy) -> Self {
        self.recovery_policy = policy;
        self
    }

    pub fn display_name(&self) -> String {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => friendly_name(&self.climate_device),
        }
    }

    /// Checks the entity references the way the setup form does.
    pub fn validate(&self) -> Result<()> {
        check_entity("climate_device", &self.climate_device, &["climate"])?;
        check_entity("schedule_device", &self.schedule_device, &["schedule"])?;
        if let Some(binary_input) = self.binary_input.as_deref() {
            if !binary_input.is_empty() {
                check_entity("binary_input", binary_input, &["binary_sensor", "switch"])?;
            }
        }
        if !(self.setback_temperature_min.is_finite() && self.setback_temperature_max.is_finite())
            || self.setback_temperature_min > self.setback_temperature_max
        {
            return Err(SetbackError::InvalidLimits {
                min: self.setback_temperature_min,
                max: self.setback_temperature_max,
            });
        }
        Ok(())
    }

    pub fn references(&self, entity_id: &str) -> bool {
        self.climate_device == entity_id
            || self.schedule_device == entity_id
            || self.binary_input.as_deref() == Some(entity_id)
    }
}

fn check_entity(field: &'static str, entity_id: &str, domains: &[&'static str]) -> Result<()> {
    if entity_id.trim().is_empty() {
        return Err(SetbackError::MissingDevice { field });
    }

    let Some((domain, object_id)) = entity_id.split_once('.') else {
        return Err(SetbackError::InvalidEntityId(entity_id.to_string()));
    };
    if object_id.is_empty() {
        return Err(SetbackError::InvalidEntityId(entity_id.to_string()));
    }

    if !domains.contains(&domain) {
        return Err(SetbackError::WrongDomain {
            entity_id: entity_id.to_string(),
            expected: domains.join(" or "),
        });
    }
    Ok(())
}

/// Values the host keeps across restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSettings {
    pub setback_temperature: f32,
    pub normal_temperature: f32,
    pub forced_setback: bool,
    pub controller_active: bool,
    #[serde(default)]
    pub last_recovery_time: Option<f64>,
}

impl Default for PersistedSettings {
    fn default() -> Self {
        Self {
            setback_temperature: DEFAULT_SETBACK_TEMPERATURE,
            normal_temperature: DEFAULT_NORMAL_TEMPERATURE,
            forced_setback: false,
            controller_active: true,
            last_recovery_time: None,
        }
    }
}

impl PersistedSettings {
    /// Field-by-field restore. Anything that can't be coerced is logged and
    /// the default is kept.
    pub fn restore(raw: &Value) -> Self {
        let mut settings = Self::default();
        let Some(fields) = raw.as_object() else {
            if !raw.is_null() {
                warn!("ignoring restored settings that are not an object: {raw}");
            }
            return settings;
        };

        for (key, value) in fields {
            match key.as_str() {
                "setback_temperature" => match coerce_temperature(value) {
                    Some(temp) => settings.setback_temperature = temp,
                    None => warn!("invalid setback temperature state: {value}"),
                },
                "normal_temperature" => match coerce_temperature(value) {
                    Some(temp) => settings.normal_temperature = temp,
                    None => warn!("invalid normal temperature state: {value}"),
                },
                "forced_setback" => match coerce_flag(value) {
                    Some(flag) => settings.forced_setback = flag,
                    None => warn!("invalid forced setback state: {value}"),
                },
                "controller_active" => match coerce_flag(value) {
                    Some(flag) => settings.controller_active = flag,
                    None => warn!("invalid controller active state: {value}"),
                },
                "last_recovery_time" => match value {
                    Value::Null => {}
                    other => match coerce_number(other) {
                        Some(seconds) if seconds >= 0.0 => {
                            settings.last_recovery_time = Some(seconds)
                        }
                        _ => warn!("invalid recovery time state: {other}"),
                    },
                },
                _ => {}
            }
        }

        settings
    }
}

fn coerce_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(number) => number.as_f64()?,
        Value::String(text) => text.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then_some(number)
}

fn coerce_temperature(value: &Value) -> Option<f32> {
    let temp = coerce_number(value)? as f32;
    temp.is_finite().then_some(temp)
}

fn coerce_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "on" | "true" | "1" => Some(true),
            "off" | "false" | "0" => Some(false),
            _ => None,
        },
        Value::Number(number) => number.as_i64().map(|n| n != 0),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    #[serde(default = "default_event_topic")]
    pub event_topic: String,
    #[serde(default = "default_command_topic")]
    pub command_topic: String,
}

fn default_event_topic() -> String {
    TOPIC_STATE_CHANGED.to_string()
}

fn default_command_topic() -> String {
    TOPIC_CMD_SET_TEMPERATURE.to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "192.168.1.100".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            event_topic: default_event_topic(),
            command_topic: default_command_topic(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub controllers: Vec<CoordinatorConfig>,
}

impl RuntimeConfig {
    /// Drops controllers that fail validation, logging why. Persisted state
    /// is keyed by climate device, so only the first controller per device
    /// is kept.
    pub fn sanitize(&mut self) {
        let mut seen = HashSet::new();
        self.controllers.retain(|controller| {
            if let Err(err) = controller.validate() {
                warn!(
                    "dropping controller for {}: {err}",
                    controller.climate_device
                );
                return false;
            }
            if !seen.insert(controller.climate_device.clone()) {
                warn!(
                    "dropping duplicate controller for {}",
                    controller.climate_device
                );
                return false;
            }
            true
        });

        if self.network.event_topic.trim().is_empty() {
            self.network.event_topic = default_event_topic();
        }
        if self.network.command_topic.trim().is_empty() {
            self.network.command_topic = default_command_topic();
        }
    }
}
