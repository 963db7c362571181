use std::{fmt, str::FromStr};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::{
    error::EngineError,
    schedule::{EventAction, EventId, Recurrence},
};

pub const MIN_TEMPERATURE_C: i32 = 16;
pub const MAX_TEMPERATURE_C: i32 = 30;
pub const MAX_TIMER_MINUTES: u32 = 480;
pub const TIMER_STEP_MINUTES: u32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcMode {
    Cool,
    Heat,
    Dry,
    Fan,
    Auto,
}

impl AcMode {
    pub const ALL: [AcMode; 5] = [Self::Cool, Self::Heat, Self::Dry, Self::Fan, Self::Auto];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cool => "cool",
            Self::Heat => "heat",
            Self::Dry => "dry",
            Self::Fan => "fan",
            Self::Auto => "auto",
        }
    }
}

impl fmt::Display for AcMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AcMode {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cool" => Ok(Self::Cool),
            "heat" => Ok(Self::Heat),
            "dry" => Ok(Self::Dry),
            "fan" => Ok(Self::Fan),
            "auto" => Ok(Self::Auto),
            _ => Err(EngineError::invalid_argument("mode", value)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanSpeed {
    Low,
    Medium,
    High,
    Auto,
}

impl FanSpeed {
    pub const ALL: [FanSpeed; 4] = [Self::Low, Self::Medium, Self::High, Self::Auto];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Auto => "auto",
        }
    }
}

impl fmt::Display for FanSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FanSpeed {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "auto" => Ok(Self::Auto),
            _ => Err(EngineError::invalid_argument("fan speed", value)),
        }
    }
}

/// Operating state of the unit. Settings survive power-off; `is_on` only
/// tells consumers whether the rest is currently in effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceState {
    #[serde(rename = "isOn")]
    pub is_on: bool,
    pub temperature: i32,
    pub mode: AcMode,
    #[serde(rename = "fanSpeed")]
    pub fan_speed: FanSpeed,
    pub swing: bool,
    #[serde(rename = "timerMinutes")]
    pub timer_minutes: u32,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            is_on: false,
            temperature: 22,
            mode: AcMode::Cool,
            fan_speed: FanSpeed::Auto,
            swing: false,
            timer_minutes: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    #[default]
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Celsius => "°C",
            Self::Fahrenheit => "°F",
        }
    }

    pub fn convert_celsius(self, celsius: i32) -> f32 {
        match self {
            Self::Celsius => celsius as f32,
            Self::Fahrenheit => celsius as f32 * 9.0 / 5.0 + 32.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    #[serde(rename = "deviceName")]
    pub device_name: String,
    #[serde(rename = "isOn")]
    pub is_on: bool,
    pub temperature: i32,
    #[serde(rename = "displayTemperature")]
    pub display_temperature: f32,
    #[serde(rename = "temperatureUnit")]
    pub temperature_unit: &'static str,
    pub mode: &'static str,
    #[serde(rename = "fanSpeed")]
    pub fan_speed: &'static str,
    pub swing: bool,
    #[serde(rename = "timerMinutes")]
    pub timer_minutes: u32,
    #[serde(rename = "timerString")]
    pub timer_string: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpcomingEventView {
    pub id: EventId,
    pub title: String,
    pub at: NaiveDateTime,
    pub action: EventAction,
    pub mode: Option<AcMode>,
    pub temperature: Option<i32>,
    pub recurring: Recurrence,
    #[serde(rename = "recurrenceLabel")]
    pub recurrence_label: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_modes_case_insensitively() {
        assert_eq!("COOL".parse::<AcMode>().unwrap(), AcMode::Cool);
        assert_eq!(" dry ".parse::<AcMode>().unwrap(), AcMode::Dry);
        for mode in AcMode::ALL {
            assert_eq!(mode.as_str().parse::<AcMode>().unwrap(), mode);
        }
    }

    #[test]
    fn parses_fan_speeds_case_insensitively() {
        assert_eq!("HIGH".parse::<FanSpeed>().unwrap(), FanSpeed::High);
        for speed in FanSpeed::ALL {
            assert_eq!(speed.as_str().parse::<FanSpeed>().unwrap(), speed);
        }
    }

    #[test]
    fn unknown_fan_speed_is_invalid_argument() {
        let err = "turbo".parse::<FanSpeed>().unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument { .. }));
    }

    #[test]
    fn converts_display_temperature() {
        assert_eq!(TemperatureUnit::Celsius.convert_celsius(22), 22.0);
        assert_eq!(TemperatureUnit::Fahrenheit.convert_celsius(30), 86.0);
    }

    #[test]
    fn device_state_serializes_with_dashboard_field_names() {
        let json = serde_json::to_value(DeviceState::default()).unwrap();
        assert_eq!(json["isOn"], false);
        assert_eq!(json["fanSpeed"], "auto");
        assert_eq!(json["timerMinutes"], 0);
        assert_eq!(json["mode"], "cool");
    }
}
