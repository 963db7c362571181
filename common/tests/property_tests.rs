//! Property tests for the device bounds and schedule ordering.

use aircon_common::{DeviceController, NewScheduleEvent, ScheduleEngine, UpcomingQuery};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use proptest::prelude::*;

fn base_instant() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 7, 15)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn event_fields(day_offset: i64, minute_of_day: u32, recurring: &str) -> NewScheduleEvent {
    let date = base_instant().date() + Duration::days(day_offset);
    NewScheduleEvent {
        title: "generated".to_string(),
        date: date.format("%Y-%m-%d").to_string(),
        time: format!("{:02}:{:02}", minute_of_day / 60, minute_of_day % 60),
        action: "off".to_string(),
        mode: None,
        temperature: None,
        recurring: Some(recurring.to_string()),
    }
}

proptest! {
    #[test]
    fn temperature_always_within_bounds(
        start in 16i32..=30,
        deltas in proptest::collection::vec(any::<i32>(), 1..20),
    ) {
        let mut device = DeviceController::default();
        device.set_temperature(start);

        for delta in deltas {
            device.adjust_temperature(delta);
            let temperature = device.snapshot().temperature;
            prop_assert!((16..=30).contains(&temperature));
        }
    }

    #[test]
    fn interior_step_up_then_down_is_identity(start in 16i32..30) {
        let mut device = DeviceController::default();
        device.set_temperature(start);

        device.adjust_temperature(1);
        device.adjust_temperature(-1);

        prop_assert_eq!(device.snapshot().temperature, start);
    }

    #[test]
    fn timer_is_on_quarter_hour_grid(minutes in any::<i64>()) {
        let mut device = DeviceController::default();
        device.set_timer(minutes);

        let timer = device.snapshot().timer_minutes;
        prop_assert!(timer <= 480);
        prop_assert_eq!(timer % 15, 0);
    }

    #[test]
    fn upcoming_is_sorted_and_never_before_now(
        specs in proptest::collection::vec((-30i64..30, 0u32..1440, 0usize..3), 1..12),
        now_offset_minutes in 0i64..(60 * 24 * 14),
        limit in proptest::option::of(0usize..15),
    ) {
        let mut engine = ScheduleEngine::new();
        for (day_offset, minute, recurrence) in &specs {
            let recurring = ["none", "daily", "weekly"][*recurrence];
            engine.create_event(event_fields(*day_offset, *minute, recurring)).unwrap();
        }
        let now = base_instant() + Duration::minutes(now_offset_minutes);

        let mut query = UpcomingQuery::new(now);
        query.limit = limit;
        let resolution = engine.resolve(&query);
        let occurrences = resolution.occurrences;

        prop_assert!(resolution.skipped.is_empty());
        if let Some(limit) = limit {
            prop_assert!(occurrences.len() <= limit);
        }
        for pair in occurrences.windows(2) {
            prop_assert!((pair[0].at, pair[0].event.id) < (pair[1].at, pair[1].event.id));
        }
        for occurrence in &occurrences {
            prop_assert!(occurrence.at >= now);
            prop_assert_eq!(occurrence.at.time(), occurrence.event.time);
        }
    }

    #[test]
    fn recurring_events_always_resolve_within_one_period(
        day_offset in -400i64..400,
        minute in 0u32..1440,
        weekly in any::<bool>(),
        now_offset_minutes in 0i64..(60 * 24 * 60),
    ) {
        let mut engine = ScheduleEngine::new();
        let recurring = if weekly { "weekly" } else { "daily" };
        let event = engine.create_event(event_fields(day_offset, minute, recurring)).unwrap();
        let now = base_instant() + Duration::minutes(now_offset_minutes);

        let next = event.next_occurrence(now).unwrap().unwrap();
        let period = Duration::days(if weekly { 7 } else { 1 });

        prop_assert!(next >= now);
        prop_assert!(next < now + period);
        if weekly {
            prop_assert_eq!((next.date() - event.date).num_days().rem_euclid(7), 0);
        }
    }
}
