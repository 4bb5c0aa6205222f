use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SetbackMode {
    Normal,
    Setback,
}

impl SetbackMode {
    pub fn from_setback(is_setback: bool) -> Self {
        if is_setback {
            Self::Setback
        } else {
            Self::Normal
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Setback => "setback",
        }
    }
}

/// Outbound "set temperature" command for the controlled climate device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetTemperature {
    pub entity_id: String,
    pub temperature: f32,
}

/// Read-only projection of a coordinator at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoordinatorState {
    pub schedule_active: bool,
    pub input_is_active: bool,
    pub forced_setback: bool,
    pub controller_active: bool,
    pub is_setback: bool,
    pub mode: &'static str,
    pub setback_temperature: f32,
    pub normal_temperature: f32,
    pub normal_temperature_min: f32,
    pub normal_temperature_max: f32,
    pub normal_temperature_step: f32,
    pub target_temperature: f32,
    pub recovery_start_time: Option<DateTime<Utc>>,
    pub is_recovering: bool,
    /// Seconds, rounded to one decimal place.
    pub last_recovery_time: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub identifier: String,
    pub name: String,
    pub manufacturer: &'static str,
    pub model: &'static str,
}

impl DeviceInfo {
    pub const MANUFACTURER: &'static str = "Thermostat Setback Controller";
    pub const MODEL: &'static str = "Setback Controller";
}

/// `climate.living_room` -> `Living Room`
pub fn friendly_name(entity_id: &str) -> String {
    let object_id = entity_id
        .split_once('.')
        .map(|(_, object_id)| object_id)
        .unwrap_or(entity_id);

    object_id
        .split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
