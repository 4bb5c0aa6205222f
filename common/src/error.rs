use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum SetbackError {
    #[error("{field} is required")]
    MissingDevice { field: &'static str },

    #[error("invalid entity id: {0}")]
    InvalidEntityId(String),

    #[error("{entity_id} is not a {expected} entity")]
    WrongDomain { entity_id: String, expected: String },

    #[error("setback limits {min}..={max} are not a valid range")]
    InvalidLimits { min: f32, max: f32 },

    #[error("temperature {value} is outside {min}..={max}")]
    TemperatureOutOfRange { value: f32, min: f32, max: f32 },

    #[error("temperature must be a finite number")]
    NonFiniteTemperature,
}

pub type Result<T> = std::result::Result<T, SetbackError>;
