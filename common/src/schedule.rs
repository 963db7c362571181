use std::{collections::BTreeMap, fmt, num::ParseIntError, str::FromStr};

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    error::EngineError,
    types::{AcMode, UpcomingEventView, MAX_TEMPERATURE_C, MIN_TEMPERATURE_C},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(u64);

impl EventId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for EventId {
    type Err = ParseIntError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value.trim().parse::<u64>().map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventAction {
    On,
    Off,
}

impl EventAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
        }
    }
}

impl fmt::Display for EventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventAction {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "on" => Ok(Self::On),
            "off" => Ok(Self::Off),
            _ => Err(EngineError::invalid_argument("action", value)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recurrence {
    #[default]
    None,
    Daily,
    Weekly,
}

impl Recurrence {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::None => "One-time",
            Self::Daily => "Daily",
            Self::Weekly => "Weekly",
        }
    }

    fn period(self) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::Daily => Some(Duration::days(1)),
            Self::Weekly => Some(Duration::days(7)),
        }
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Recurrence {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(Self::None),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            _ => Err(EngineError::invalid_argument("recurrence", value)),
        }
    }
}

/// Form fields for a new event, as entered on the scheduler page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewScheduleEvent {
    #[serde(default)]
    pub title: String,
    pub date: String,
    pub time: String,
    pub action: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub temperature: Option<i32>,
    #[serde(default)]
    pub recurring: Option<String>,
}

/// A stored automation event. `date` and `time` form the recurrence anchor;
/// `mode` and `temperature` are only ever present on `On` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEvent {
    pub id: EventId,
    pub title: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub action: EventAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<AcMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<i32>,
    #[serde(default)]
    pub recurring: Recurrence,
}

impl ScheduleEvent {
    pub fn anchor(&self) -> NaiveDateTime {
        self.date.and_time(self.time)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        match self.action {
            EventAction::On => {
                if let Some(temperature) = self.temperature {
                    check_temperature(temperature)?;
                }
            }
            EventAction::Off => {
                if self.mode.is_some() {
                    return Err(EngineError::validation(
                        "mode",
                        "must be absent when action is off",
                    ));
                }
                if self.temperature.is_some() {
                    return Err(EngineError::validation(
                        "temperature",
                        "must be absent when action is off",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Lazily expands every occurrence at or after `now`.
    pub fn occurrences_from(&self, now: NaiveDateTime) -> Result<Occurrences, EngineError> {
        self.validate()?;

        let anchor = self.anchor();
        let Some(period) = self.recurring.period() else {
            let next = (anchor >= now).then_some(anchor);
            return Ok(Occurrences { next, period: None });
        };

        // Step from the anchor in whole periods (backwards too) to the last
        // candidate on or before today, then walk forward past `now`.
        let elapsed_days = (now.date() - self.date).num_days();
        let period_days = period.num_days();
        let periods = elapsed_days.div_euclid(period_days);
        let mut candidate = Duration::try_days(periods.saturating_mul(period_days))
            .and_then(|offset| anchor.checked_add_signed(offset))
            .ok_or_else(|| out_of_range(self.id))?;

        while candidate < now {
            candidate = candidate
                .checked_add_signed(period)
                .ok_or_else(|| out_of_range(self.id))?;
        }

        Ok(Occurrences {
            next: Some(candidate),
            period: Some(period),
        })
    }

    pub fn next_occurrence(
        &self,
        now: NaiveDateTime,
    ) -> Result<Option<NaiveDateTime>, EngineError> {
        Ok(self.occurrences_from(now)?.next())
    }
}

fn out_of_range(id: EventId) -> EngineError {
    EngineError::validation("date", format!("event {id} recurs outside the calendar range"))
}

fn check_temperature(temperature: i32) -> Result<(), EngineError> {
    if (MIN_TEMPERATURE_C..=MAX_TEMPERATURE_C).contains(&temperature) {
        Ok(())
    } else {
        Err(EngineError::validation(
            "temperature",
            format!("{temperature} is outside {MIN_TEMPERATURE_C}..={MAX_TEMPERATURE_C}"),
        ))
    }
}

/// Successive occurrences of one event, ascending. Ends after one item for
/// one-time events and runs until the calendar overflows for recurring ones.
#[derive(Debug, Clone)]
pub struct Occurrences {
    next: Option<NaiveDateTime>,
    period: Option<Duration>,
}

impl Iterator for Occurrences {
    type Item = NaiveDateTime;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = self
            .period
            .and_then(|period| current.checked_add_signed(period));
        Some(current)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Occurrence<'a> {
    pub event: &'a ScheduleEvent,
    pub at: NaiveDateTime,
}

impl Occurrence<'_> {
    pub fn view(&self) -> UpcomingEventView {
        UpcomingEventView {
            id: self.event.id,
            title: self.event.title.clone(),
            at: self.at,
            action: self.event.action,
            mode: self.event.mode,
            temperature: self.event.temperature,
            recurring: self.event.recurring,
            recurrence_label: self.event.recurring.label(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedEvent {
    pub id: EventId,
    pub error: EngineError,
}

#[derive(Debug, Clone, Default)]
pub struct Resolution<'a> {
    pub occurrences: Vec<Occurrence<'a>>,
    pub skipped: Vec<SkippedEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpcomingQuery {
    pub now: NaiveDateTime,
    pub limit: Option<usize>,
    pub horizon: Option<NaiveDateTime>,
}

impl UpcomingQuery {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now,
            limit: None,
            horizon: None,
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn horizon(mut self, horizon: NaiveDateTime) -> Self {
        self.horizon = Some(horizon);
        self
    }
}

#[derive(Debug, Clone)]
pub struct ScheduleEngine {
    events: BTreeMap<EventId, ScheduleEvent>,
    next_id: u64,
}

impl Default for ScheduleEngine {
    fn default() -> Self {
        Self {
            events: BTreeMap::new(),
            next_id: 1,
        }
    }
}

impl ScheduleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores a stored schedule. Events are kept as-is, even ones that no
    /// longer validate; the resolver reports those instead of dropping them.
    pub fn from_events(events: Vec<ScheduleEvent>) -> Self {
        let mut engine = Self::new();
        for event in events {
            let id = event.id;
            engine.next_id = engine.next_id.max(id.get().saturating_add(1));
            if engine.events.insert(id, event).is_some() {
                warn!(event = %id, "duplicate schedule event id, keeping the last one");
            }
        }
        engine
    }

    /// The three sample events shown on a fresh dashboard.
    pub fn with_demo_events() -> Self {
        let mut engine = Self::new();
        let samples = [
            ("Morning Cooling", "2024-07-15", "07:00", "on", Some("cool"), Some(22), "daily"),
            ("Night Off", "2024-07-15", "23:00", "off", None, None, "daily"),
            ("Weekend Heating", "2024-07-20", "09:00", "on", Some("heat"), Some(24), "weekly"),
        ];
        for (title, date, time, action, mode, temperature, recurring) in samples {
            let fields = NewScheduleEvent {
                title: title.to_string(),
                date: date.to_string(),
                time: time.to_string(),
                action: action.to_string(),
                mode: mode.map(str::to_string),
                temperature,
                recurring: Some(recurring.to_string()),
            };
            if let Err(err) = engine.create_event(fields) {
                warn!("demo schedule event rejected: {err}");
            }
        }
        engine
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn get(&self, id: EventId) -> Option<&ScheduleEvent> {
        self.events.get(&id)
    }

    pub fn events(&self) -> impl Iterator<Item = &ScheduleEvent> {
        self.events.values()
    }

    pub fn to_events(&self) -> Vec<ScheduleEvent> {
        self.events.values().cloned().collect()
    }

    /// Validates the form fields, assigns a fresh id and stores the event.
    /// The first invalid field, in form order, is reported.
    pub fn create_event(&mut self, fields: NewScheduleEvent) -> Result<ScheduleEvent, EngineError> {
        let date = parse_date(&fields.date)?;
        let time = parse_time(&fields.time)?;
        let action = fields.action.parse::<EventAction>().map_err(|_| {
            EngineError::validation("action", format!("'{}' is not on/off", fields.action))
        })?;
        let mode = parse_mode(fields.mode.as_deref())?;
        let recurring = parse_recurrence(fields.recurring.as_deref())?;

        let event = ScheduleEvent {
            id: EventId(self.next_id),
            title: fields.title.trim().to_string(),
            date,
            time,
            action,
            mode,
            temperature: fields.temperature,
            recurring,
        };
        event.validate()?;
        if self.events.contains_key(&event.id) {
            return Err(EngineError::validation("id", "no free event ids left"));
        }

        self.next_id = self.next_id.saturating_add(1);
        self.events.insert(event.id, event.clone());
        Ok(event)
    }

    pub fn delete_event(&mut self, id: EventId) -> Result<ScheduleEvent, EngineError> {
        self.events.remove(&id).ok_or(EngineError::NotFound(id))
    }

    /// Next occurrence of each event at or after `query.now`, earliest first
    /// with ties broken by id. Events that fail to resolve are skipped and
    /// listed in `skipped`.
    pub fn resolve(&self, query: &UpcomingQuery) -> Resolution<'_> {
        let mut resolution = Resolution::default();

        for event in self.events.values() {
            match event.next_occurrence(query.now) {
                Ok(Some(at)) if query.horizon.map_or(true, |horizon| at <= horizon) => {
                    resolution.occurrences.push(Occurrence { event, at });
                }
                Ok(_) => {}
                Err(error) => {
                    warn!(event = %event.id, "skipping unresolvable schedule event: {error}");
                    resolution.skipped.push(SkippedEvent {
                        id: event.id,
                        error,
                    });
                }
            }
        }

        resolution
            .occurrences
            .sort_by_key(|occurrence| (occurrence.at, occurrence.event.id));
        if let Some(limit) = query.limit {
            resolution.occurrences.truncate(limit);
        }

        resolution
    }

    pub fn resolve_upcoming(
        &self,
        now: NaiveDateTime,
        limit: Option<usize>,
        horizon: Option<NaiveDateTime>,
    ) -> Vec<Occurrence<'_>> {
        self.resolve(&UpcomingQuery {
            now,
            limit,
            horizon,
        })
        .occurrences
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate, EngineError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| EngineError::validation("date", format!("'{raw}' is not a YYYY-MM-DD date")))
}

fn parse_time(raw: &str) -> Result<NaiveTime, EngineError> {
    let trimmed = raw.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
        .map_err(|_| EngineError::validation("time", format!("'{raw}' is not an HH:MM time")))
}

fn parse_mode(raw: Option<&str>) -> Result<Option<AcMode>, EngineError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => raw
            .parse::<AcMode>()
            .map(Some)
            .map_err(|_| EngineError::validation("mode", format!("'{raw}' is not a mode"))),
    }
}

fn parse_recurrence(raw: Option<&str>) -> Result<Recurrence, EngineError> {
    let Some(raw) = raw else {
        return Ok(Recurrence::None);
    };
    raw.parse::<Recurrence>().map_err(|_| {
        EngineError::validation("recurring", format!("'{raw}' is not none/daily/weekly"))
    })
}
