pub mod config;
pub mod device;
pub mod driver;
pub mod error;
pub mod schedule;
pub mod types;

pub use config::{
    ControllerConfig, NotificationPreferences, PersistedSettings, Preferences, RuntimeConfig,
};
pub use device::DeviceController;
pub use driver::{AppliedEvent, ScheduleDriver};
pub use error::EngineError;
pub use schedule::{
    EventAction, EventId, NewScheduleEvent, Occurrence, Occurrences, Recurrence, Resolution,
    ScheduleEngine, ScheduleEvent, SkippedEvent, UpcomingQuery,
};
pub use types::{
    AcMode, DeviceState, DeviceStatus, FanSpeed, TemperatureUnit, UpcomingEventView,
};
