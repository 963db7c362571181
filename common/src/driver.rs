use chrono::{Duration, NaiveDateTime};
use tracing::{debug, info};

use crate::{
    device::DeviceController,
    schedule::{EventAction, EventId, ScheduleEngine, UpcomingQuery},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedEvent {
    pub id: EventId,
    pub action: EventAction,
    pub at: NaiveDateTime,
    pub changed: bool,
}

/// Applies due schedule events to the device. Keeps a cursor so each
/// occurrence fires once; the first pass starts at `now`, so nothing in the
/// past fires retroactively.
///
/// Only the next occurrence of each event is considered per pass. Callers are
/// expected to reconcile on a short fixed interval and never concurrently.
#[derive(Debug, Clone, Default)]
pub struct ScheduleDriver {
    cursor: Option<NaiveDateTime>,
}

impl ScheduleDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instant of the last completed pass.
    pub fn cursor(&self) -> Option<NaiveDateTime> {
        self.cursor
    }

    pub fn reconcile(
        &mut self,
        schedule: &ScheduleEngine,
        device: &mut DeviceController,
        now: NaiveDateTime,
    ) -> Vec<AppliedEvent> {
        let from = match self.cursor {
            None => now,
            Some(last) if last < now => last + Duration::nanoseconds(1),
            Some(last) => {
                // Local clock stepped back (DST, timezone change); wait for it
                // to pass the cursor again.
                debug!(%last, %now, "clock behind reconcile cursor");
                return Vec::new();
            }
        };

        let query = UpcomingQuery::new(from).horizon(now);
        let mut applied = Vec::new();
        for occurrence in schedule.resolve(&query).occurrences {
            let changed = device.apply_event(occurrence.event);
            info!(
                event = %occurrence.event.id,
                title = %occurrence.event.title,
                action = %occurrence.event.action,
                at = %occurrence.at,
                changed,
                "schedule event fired"
            );
            applied.push(AppliedEvent {
                id: occurrence.event.id,
                action: occurrence.event.action,
                at: occurrence.at,
                changed,
            });
        }

        self.cursor = Some(now);
        applied
    }
}
