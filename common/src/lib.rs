pub mod config;
pub mod coordinator;
pub mod error;
pub mod recovery;
pub mod resolver;
pub mod signal;
pub mod topics;
pub mod types;

pub use config::{CoordinatorConfig, NetworkConfig, PersistedSettings, RecoveryPolicy, RuntimeConfig};
pub use coordinator::{Actuator, ListenerId, SetbackCoordinator, StateListener};
pub use error::{Result, SetbackError};
pub use recovery::{RecoveryState, RecoveryTracker};
pub use resolver::{resolve, Signals};
pub use signal::{BooleanSignalSource, ClimateReading, EntityState, StateChangedEvent};
pub use topics::*;
pub use types::{CoordinatorState, DeviceInfo, SetTemperature, SetbackMode};
