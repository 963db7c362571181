use serde::{Deserialize, Serialize};

use crate::types::{
    AcMode, DeviceState, FanSpeed, TemperatureUnit, MAX_TEMPERATURE_C, MIN_TEMPERATURE_C,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub reconcile_interval_ms: u64,
    pub state_log_interval_ms: u64,
    pub upcoming_limit: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_ms: 1_000,
            state_log_interval_ms: 10_000,
            upcoming_limit: 5,
        }
    }
}

impl ControllerConfig {
    pub fn sanitize(&mut self) {
        self.reconcile_interval_ms = self.reconcile_interval_ms.clamp(100, 60_000);
        self.state_log_interval_ms = self.state_log_interval_ms.clamp(1_000, 3_600_000);
        if self.upcoming_limit == 0 {
            self.upcoming_limit = 5;
        }
    }
}

/// Device state restored at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSettings {
    pub is_on: bool,
    pub temperature: i32,
    pub mode: AcMode,
    pub fan_speed: FanSpeed,
    pub swing: bool,
    pub timer_minutes: u32,
}

impl Default for PersistedSettings {
    fn default() -> Self {
        Self::from(DeviceState::default())
    }
}

impl From<DeviceState> for PersistedSettings {
    fn from(state: DeviceState) -> Self {
        Self {
            is_on: state.is_on,
            temperature: state.temperature,
            mode: state.mode,
            fan_speed: state.fan_speed,
            swing: state.swing,
            timer_minutes: state.timer_minutes,
        }
    }
}

impl PersistedSettings {
    pub fn sanitize(&mut self) {
        self.temperature = self.temperature.clamp(MIN_TEMPERATURE_C, MAX_TEMPERATURE_C);
        self.timer_minutes = crate::device::normalize_timer(i64::from(self.timer_minutes));
    }

    pub fn to_state(&self) -> DeviceState {
        DeviceState {
            is_on: self.is_on,
            temperature: self.temperature,
            mode: self.mode,
            fan_speed: self.fan_speed,
            swing: self.swing,
            timer_minutes: self.timer_minutes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPreferences {
    pub push: bool,
    pub email_alerts: bool,
    pub maintenance_reminders: bool,
    pub energy_reports: bool,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            push: true,
            email_alerts: false,
            maintenance_reminders: true,
            energy_reports: true,
        }
    }
}

/// User preferences shown on the settings page. Only `temperature_unit`
/// changes anything the controller reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    pub device_name: String,
    pub temperature_unit: TemperatureUnit,
    pub auto_mode: bool,
    pub eco_mode: bool,
    #[serde(default)]
    pub notifications: NotificationPreferences,
    pub auto_connect: bool,
    pub child_lock: bool,
    pub remote_access: bool,
    pub power_saver: bool,
    pub scheduled_maintenance: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            device_name: "Living Room AC".to_string(),
            temperature_unit: TemperatureUnit::Celsius,
            auto_mode: true,
            eco_mode: false,
            notifications: NotificationPreferences::default(),
            auto_connect: true,
            child_lock: false,
            remote_access: true,
            power_saver: false,
            scheduled_maintenance: true,
        }
    }
}

impl Preferences {
    pub const MAX_DEVICE_NAME_LEN: usize = 64;

    pub fn sanitize(&mut self) {
        let trimmed = self.device_name.trim();
        self.device_name = if trimmed.is_empty() {
            Preferences::default().device_name
        } else {
            trimmed.chars().take(Self::MAX_DEVICE_NAME_LEN).collect()
        };
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub controller: ControllerConfig,
    pub settings: PersistedSettings,
    #[serde(default)]
    pub preferences: Preferences,
    pub timezone: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            controller: ControllerConfig::default(),
            settings: PersistedSettings::default(),
            preferences: Preferences::default(),
            timezone: "UTC".to_string(),
        }
    }
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.controller.sanitize();
        self.settings.sanitize();
        self.preferences.sanitize();
    }
}
