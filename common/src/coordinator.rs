use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::{
    config::{
        CoordinatorConfig, PersistedSettings, RecoveryPolicy, DEFAULT_TEMPERATURE_MAX,
        DEFAULT_TEMPERATURE_MIN, DEFAULT_TEMPERATURE_STEP,
    },
    recovery::RecoveryTracker,
    resolver::Signals,
    signal::{BooleanSignalSource, ClimateReading, EntityState, StateChangedEvent},
    types::{CoordinatorState, DeviceInfo, SetTemperature, SetbackMode},
};

/// Outbound side of the climate device.
///
/// `submit` hands the command off and returns immediately. Delivery and
/// retries are the implementor's concern; the coordinator never learns
/// whether the device applied the temperature.
pub trait Actuator: Send {
    fn submit(&self, command: SetTemperature);
}

/// Called synchronously after every mutation, before the mutator returns.
pub trait StateListener: Send {
    fn state_changed(&self, state: &CoordinatorState);
}

impl<F> StateListener for F
where
    F: Fn(&CoordinatorState) + Send,
{
    fn state_changed(&self, state: &CoordinatorState) {
        self(state)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, Copy, PartialEq)]
struct TemperatureBounds {
    min: f32,
    max: f32,
    step: f32,
}

impl Default for TemperatureBounds {
    fn default() -> Self {
        Self {
            min: DEFAULT_TEMPERATURE_MIN,
            max: DEFAULT_TEMPERATURE_MAX,
            step: DEFAULT_TEMPERATURE_STEP,
        }
    }
}

/// Owns the setback state of one climate device.
pub struct SetbackCoordinator<A> {
    config: CoordinatorConfig,
    signals: Signals,
    is_setback: bool,
    setback_temperature: f32,
    normal_temperature: f32,
    bounds: TemperatureBounds,
    recovery: RecoveryTracker,
    actuator: A,
    listeners: Vec<(ListenerId, Box<dyn StateListener>)>,
    next_listener_id: u64,
}

impl<A: Actuator> SetbackCoordinator<A> {
    /// Starts from values kept by the host across a restart. Nothing is
    /// sent and nobody is notified; call [`Self::refresh`] once wiring is done.
    pub fn new(config: CoordinatorConfig, settings: PersistedSettings, actuator: A) -> Self {
        let signals = Signals {
            forced_setback: settings.forced_setback,
            controller_active: settings.controller_active,
            ..Signals::default()
        };
        Self {
            config,
            signals,
            is_setback: signals.resolve(),
            setback_temperature: settings.setback_temperature,
            normal_temperature: settings.normal_temperature,
            bounds: TemperatureBounds::default(),
            recovery: RecoveryTracker::new(settings.last_recovery_time),
            actuator,
            listeners: Vec::new(),
            next_listener_id: 0,
        }
    }

    pub fn add_listener(&mut self, listener: impl StateListener + 'static) -> ListenerId {
        let id = ListenerId(self.next_listener_id);
        self.next_listener_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
        self.listeners.len() != before
    }

    pub fn set_schedule_active(&mut self, active: bool, now: DateTime<Utc>) {
        self.signals.schedule_active = active;
        self.apply(now);
    }

    pub fn set_input_active(&mut self, active: bool, now: DateTime<Utc>) {
        self.signals.input_is_active = active;
        self.apply(now);
    }

    pub fn set_forced_setback(&mut self, forced: bool, now: DateTime<Utc>) {
        self.signals.forced_setback = forced;
        self.apply(now);
    }

    pub fn set_controller_active(&mut self, active: bool, now: DateTime<Utc>) {
        self.signals.controller_active = active;
        self.apply(now);
    }

    pub fn set_setback_temperature(&mut self, temperature: f32, now: DateTime<Utc>) {
        if !temperature.is_finite() {
            warn!("ignoring non-finite setback temperature");
            return;
        }
        self.setback_temperature = temperature;
        self.apply(now);
    }

    pub fn set_normal_temperature(&mut self, temperature: f32, now: DateTime<Utc>) {
        if !temperature.is_finite() {
            warn!("ignoring non-finite normal temperature");
            return;
        }
        self.normal_temperature = temperature;
        self.apply(now);
    }

    /// Re-resolves and re-sends the current target without changing any input.
    pub fn refresh(&mut self, now: DateTime<Utc>) {
        self.apply(now);
    }

    pub fn on_schedule_change<S: BooleanSignalSource>(
        &mut self,
        new_state: Option<&S>,
        now: DateTime<Utc>,
    ) {
        if let Some(state) = new_state {
            self.set_schedule_active(state.is_active(), now);
        }
    }

    pub fn on_input_change<S: BooleanSignalSource>(
        &mut self,
        new_state: Option<&S>,
        now: DateTime<Utc>,
    ) {
        if let Some(state) = new_state {
            self.set_input_active(state.is_active(), now);
        }
    }

    pub fn on_climate_change(&mut self, new_state: Option<&EntityState>, now: DateTime<Utc>) {
        if let Some(state) = new_state {
            self.handle_climate_reading(&ClimateReading::from(state), now);
        }
    }

    /// Routes an event to every input that watches its entity. Returns
    /// whether anything was applied.
    pub fn handle_event(&mut self, event: &StateChangedEvent, now: DateTime<Utc>) -> bool {
        let Some(new_state) = event.new_state.as_ref() else {
            return false;
        };

        let mut handled = false;
        if event.entity_id == self.config.schedule_device {
            self.on_schedule_change(Some(new_state), now);
            handled = true;
        }
        if self.config.binary_input.as_deref() == Some(event.entity_id.as_str()) {
            self.on_input_change(Some(new_state), now);
            handled = true;
        }
        if event.entity_id == self.config.climate_device {
            self.on_climate_change(Some(new_state), now);
            handled = true;
        }
        handled
    }

    pub fn handle_climate_reading(&mut self, reading: &ClimateReading, now: DateTime<Utc>) {
        if let Some(min) = reading.min_temp.filter(|value| *value != 0.0) {
            self.bounds.min = min;
        }
        if let Some(max) = reading.max_temp.filter(|value| *value != 0.0) {
            self.bounds.max = max;
        }
        if let Some(step) = reading.target_temp_step.filter(|value| *value != 0.0) {
            self.bounds.step = step;
        }

        let completed =
            self.recovery
                .observe(self.is_setback, self.normal_temperature, reading, now);
        if let Some(seconds) = completed {
            info!(
                "{} recovered to target in {seconds:.1}s",
                self.config.climate_device
            );
        }

        let drifted = reading
            .target_temperature
            .is_some_and(|reported| (reported - self.target_temperature()).abs() > f32::EPSILON);
        if self.config.enforce_target && drifted {
            self.actuate();
        }

        self.notify();
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn is_setback(&self) -> bool {
        self.is_setback
    }

    pub fn mode(&self) -> SetbackMode {
        SetbackMode::from_setback(self.is_setback)
    }

    pub fn schedule_active(&self) -> bool {
        self.signals.schedule_active
    }

    pub fn input_is_active(&self) -> bool {
        self.signals.input_is_active
    }

    pub fn forced_setback(&self) -> bool {
        self.signals.forced_setback
    }

    pub fn controller_active(&self) -> bool {
        self.signals.controller_active
    }

    pub fn setback_temperature(&self) -> f32 {
        self.setback_temperature
    }

    pub fn normal_temperature(&self) -> f32 {
        self.normal_temperature
    }

    pub fn normal_temperature_min(&self) -> f32 {
        self.bounds.min
    }

    pub fn normal_temperature_max(&self) -> f32 {
        self.bounds.max
    }

    pub fn normal_temperature_step(&self) -> f32 {
        self.bounds.step
    }

    pub fn target_temperature(&self) -> f32 {
        if self.is_setback {
            self.setback_temperature
        } else {
            self.normal_temperature
        }
    }

    pub fn is_recovering(&self) -> bool {
        self.recovery.is_recovering()
    }

    pub fn recovery_start_time(&self) -> Option<DateTime<Utc>> {
        self.recovery.recovery_start_time()
    }

    pub fn last_recovery_time(&self) -> Option<f64> {
        self.recovery.last_recovery_time()
    }

    pub fn state(&self) -> CoordinatorState {
        CoordinatorState {
            schedule_active: self.signals.schedule_active,
            input_is_active: self.signals.input_is_active,
            forced_setback: self.signals.forced_setback,
            controller_active: self.signals.controller_active,
            is_setback: self.is_setback,
            mode: self.mode().as_str(),
            setback_temperature: self.setback_temperature,
            normal_temperature: self.normal_temperature,
            normal_temperature_min: self.bounds.min,
            normal_temperature_max: self.bounds.max,
            normal_temperature_step: self.bounds.step,
            target_temperature: self.target_temperature(),
            recovery_start_time: self.recovery.recovery_start_time(),
            is_recovering: self.recovery.is_recovering(),
            last_recovery_time: self.recovery.last_recovery_time(),
        }
    }

    pub fn persisted(&self) -> PersistedSettings {
        PersistedSettings {
            setback_temperature: self.setback_temperature,
            normal_temperature: self.normal_temperature,
            forced_setback: self.signals.forced_setback,
            controller_active: self.signals.controller_active,
            last_recovery_time: self.recovery.last_recovery_time(),
        }
    }

    pub fn device_info(&self, identifier: impl Into<String>) -> DeviceInfo {
        DeviceInfo {
            identifier: identifier.into(),
            name: self.config.display_name(),
            manufacturer: DeviceInfo::MANUFACTURER,
            model: DeviceInfo::MODEL,
        }
    }

    fn apply(&mut self, now: DateTime<Utc>) {
        let was_setback = self.is_setback;
        self.is_setback = self.signals.resolve();

        if was_setback != self.is_setback {
            info!(
                "{} switched to {} mode",
                self.config.climate_device,
                self.mode().as_str()
            );
            if was_setback {
                self.recovery.start(now);
            } else if self.config.recovery_policy == RecoveryPolicy::Cancel
                && self.recovery.cancel()
            {
                debug!(
                    "{} re-entered setback, recovery measurement dropped",
                    self.config.climate_device
                );
            }
        }

        self.actuate();
        self.notify();
    }

    fn actuate(&self) {
        if !self.signals.controller_active {
            return;
        }

        let command = SetTemperature {
            entity_id: self.config.climate_device.clone(),
            temperature: self.target_temperature(),
        };
        debug!(
            "submitting {} -> {:.1}",
            command.entity_id, command.temperature
        );
        self.actuator.submit(command);
    }

    fn notify(&self) {
        if self.listeners.is_empty() {
            return;
        }
        let state = self.state();
        for (_, listener) in &self.listeners {
            listener.state_changed(&state);
        }
    }
}
