use tracing::debug;

use crate::{
    config::{PersistedSettings, Preferences},
    error::EngineError,
    schedule::{EventAction, ScheduleEvent},
    types::{
        AcMode, DeviceState, DeviceStatus, FanSpeed, MAX_TEMPERATURE_C, MAX_TIMER_MINUTES,
        MIN_TEMPERATURE_C, TIMER_STEP_MINUTES,
    },
};

/// Clamp a timer request into `[0, 480]` and snap it to the 15 minute grid.
pub fn normalize_timer(minutes: i64) -> u32 {
    let clamped = minutes.clamp(0, i64::from(MAX_TIMER_MINUTES));
    let step = i64::from(TIMER_STEP_MINUTES);
    let snapped = (clamped + step / 2) / step * step;
    snapped.min(i64::from(MAX_TIMER_MINUTES)) as u32
}

/// Owns the operating state of one unit. Every mutation goes through here so
/// the temperature and timer bounds always hold.
///
/// Setters return whether the state actually changed, which the host uses to
/// decide when settings need saving.
#[derive(Debug, Clone)]
pub struct DeviceController {
    state: DeviceState,
}

impl Default for DeviceController {
    fn default() -> Self {
        Self::new(PersistedSettings::default())
    }
}

impl DeviceController {
    pub fn new(mut settings: PersistedSettings) -> Self {
        settings.sanitize();
        Self {
            state: settings.to_state(),
        }
    }

    pub fn snapshot(&self) -> DeviceState {
        self.state
    }

    pub fn settings(&self) -> PersistedSettings {
        PersistedSettings::from(self.state)
    }

    pub fn is_on(&self) -> bool {
        self.state.is_on
    }

    pub fn set_power(&mut self, on: bool) -> bool {
        let changed = self.state.is_on != on;
        self.state.is_on = on;
        changed
    }

    pub fn toggle_power(&mut self) -> bool {
        self.set_power(!self.state.is_on)
    }

    /// Saturates at the 16..=30 bounds instead of failing.
    pub fn adjust_temperature(&mut self, delta: i32) -> bool {
        let target = self
            .state
            .temperature
            .saturating_add(delta)
            .clamp(MIN_TEMPERATURE_C, MAX_TEMPERATURE_C);
        let changed = target != self.state.temperature;
        self.state.temperature = target;
        changed
    }

    pub fn set_temperature(&mut self, temperature: i32) -> bool {
        self.adjust_temperature(temperature.saturating_sub(self.state.temperature))
    }

    pub fn set_mode(&mut self, mode: AcMode) -> bool {
        let changed = self.state.mode != mode;
        self.state.mode = mode;
        changed
    }

    pub fn set_mode_str(&mut self, mode: &str) -> Result<bool, EngineError> {
        let mode = mode.parse::<AcMode>()?;
        Ok(self.set_mode(mode))
    }

    pub fn set_fan_speed(&mut self, speed: FanSpeed) -> bool {
        let changed = self.state.fan_speed != speed;
        self.state.fan_speed = speed;
        changed
    }

    pub fn set_fan_speed_str(&mut self, speed: &str) -> Result<bool, EngineError> {
        let speed = speed.parse::<FanSpeed>()?;
        Ok(self.set_fan_speed(speed))
    }

    pub fn set_swing(&mut self, swing: bool) -> bool {
        let changed = self.state.swing != swing;
        self.state.swing = swing;
        changed
    }

    pub fn set_timer(&mut self, minutes: i64) -> bool {
        let normalized = normalize_timer(minutes);
        let changed = self.state.timer_minutes != normalized;
        self.state.timer_minutes = normalized;
        changed
    }

    /// Apply a due schedule event. `On` powers up first and then applies the
    /// optional mode and temperature; `Off` only drops power.
    pub fn apply_event(&mut self, event: &ScheduleEvent) -> bool {
        let mut changed = false;
        match event.action {
            EventAction::On => {
                changed |= self.set_power(true);
                if let Some(mode) = event.mode {
                    changed |= self.set_mode(mode);
                }
                if let Some(temperature) = event.temperature {
                    changed |= self.set_temperature(temperature);
                }
            }
            EventAction::Off => {
                changed |= self.set_power(false);
            }
        }
        debug!(event = %event.id, action = %event.action, changed, "applied schedule event");
        changed
    }

    pub fn timer_string(&self) -> String {
        match self.state.timer_minutes {
            0 => "No Timer".to_string(),
            n => format!("{n} min"),
        }
    }

    pub fn status(&self, preferences: &Preferences) -> DeviceStatus {
        let unit = preferences.temperature_unit;
        DeviceStatus {
            device_name: preferences.device_name.clone(),
            is_on: self.state.is_on,
            temperature: self.state.temperature,
            display_temperature: unit.convert_celsius(self.state.temperature),
            temperature_unit: unit.symbol(),
            mode: self.state.mode.as_str(),
            fan_speed: self.state.fan_speed.as_str(),
            swing: self.state.swing,
            timer_minutes: self.state.timer_minutes,
            timer_string: self.timer_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        schedule::{EventId, Recurrence},
        types::TemperatureUnit,
    };

    fn event(action: EventAction, mode: Option<AcMode>, temperature: Option<i32>) -> ScheduleEvent {
        ScheduleEvent {
            id: EventId::new(1),
            title: "Test".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 7, 15).unwrap(),
            time: chrono::NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
            action,
            mode,
            temperature,
            recurring: Recurrence::None,
        }
    }

    #[test]
    fn temperature_saturates_at_bounds() {
        let mut device = DeviceController::default();
        device.set_temperature(30);

        assert!(!device.adjust_temperature(1));
        assert_eq!(device.snapshot().temperature, 30);

        device.adjust_temperature(-100);
        assert_eq!(device.snapshot().temperature, 16);

        device.adjust_temperature(i32::MAX);
        assert_eq!(device.snapshot().temperature, 30);
    }

    #[test]
    fn up_then_down_returns_to_start() {
        let mut device = DeviceController::default();
        let start = device.snapshot().temperature;

        device.adjust_temperature(1);
        device.adjust_temperature(-1);

        assert_eq!(device.snapshot().temperature, start);
    }

    #[test]
    fn timer_snaps_to_quarter_hours() {
        let mut device = DeviceController::default();

        device.set_timer(50);
        assert_eq!(device.snapshot().timer_minutes, 45);
        device.set_timer(53);
        assert_eq!(device.snapshot().timer_minutes, 60);
        device.set_timer(-20);
        assert_eq!(device.snapshot().timer_minutes, 0);
        device.set_timer(10_000);
        assert_eq!(device.snapshot().timer_minutes, 480);
    }

    #[test]
    fn power_off_keeps_settings() {
        let mut device = DeviceController::default();
        device.set_power(true);
        device.set_mode(AcMode::Heat);
        device.set_fan_speed(FanSpeed::High);
        device.set_swing(true);
        device.set_timer(90);

        device.set_power(false);
        let state = device.snapshot();

        assert!(!state.is_on);
        assert_eq!(state.mode, AcMode::Heat);
        assert_eq!(state.fan_speed, FanSpeed::High);
        assert!(state.swing);
        assert_eq!(state.timer_minutes, 90);
    }

    #[test]
    fn unknown_mode_string_is_rejected_without_change() {
        let mut device = DeviceController::default();
        let before = device.snapshot();

        let err = device.set_mode_str("blast").unwrap_err();

        assert!(matches!(err, EngineError::InvalidArgument { kind: "mode", .. }));
        assert_eq!(device.snapshot(), before);
        assert_eq!(device.set_fan_speed_str("HIGH"), Ok(true));
    }

    #[test]
    fn setters_report_changes() {
        let mut device = DeviceController::default();

        assert!(device.set_power(true));
        assert!(!device.set_power(true));
        assert!(device.toggle_power());
        assert!(!device.is_on());
        assert!(!device.set_mode(AcMode::Cool));
    }

    #[test]
    fn applying_on_event_sets_mode_and_temperature() {
        let mut device = DeviceController::default();

        let changed = device.apply_event(&event(EventAction::On, Some(AcMode::Heat), Some(27)));
        let state = device.snapshot();

        assert!(changed);
        assert!(state.is_on);
        assert_eq!(state.mode, AcMode::Heat);
        assert_eq!(state.temperature, 27);
    }

    #[test]
    fn applying_under_specified_on_event_only_powers_up() {
        let mut device = DeviceController::default();
        let before = device.snapshot();

        device.apply_event(&event(EventAction::On, None, None));

        assert_eq!(
            device.snapshot(),
            DeviceState {
                is_on: true,
                ..before
            }
        );
    }

    #[test]
    fn applying_off_event_keeps_settings() {
        let mut device = DeviceController::default();
        device.apply_event(&event(EventAction::On, Some(AcMode::Dry), Some(18)));

        device.apply_event(&event(EventAction::Off, None, None));
        let state = device.snapshot();

        assert!(!state.is_on);
        assert_eq!(state.mode, AcMode::Dry);
        assert_eq!(state.temperature, 18);
    }

    #[test]
    fn status_uses_preferred_unit() {
        let mut device = DeviceController::default();
        device.set_timer(120);
        let preferences = Preferences {
            temperature_unit: TemperatureUnit::Fahrenheit,
            ..Preferences::default()
        };

        let status = device.status(&preferences);

        assert_eq!(status.temperature, 22);
        assert!((status.display_temperature - 71.6).abs() < 0.01);
        assert_eq!(status.temperature_unit, "°F");
        assert_eq!(status.timer_string, "120 min");
        assert_eq!(status.mode, "cool");
    }
}
