use chrono::{DateTime, Datelike, Utc};

use crate::clock::CalendarZone;
use crate::schedule::{Recurrence, Schedule};

/// Dates are compared in `zone`, so a schedule fires at most once per day.
pub fn is_due(schedule: &Schedule, now: DateTime<Utc>, zone: CalendarZone) -> bool {
    let today = zone.date_of(now);
    let not_generated_today = || match schedule.last_generated {
        None => true,
        Some(last) => today > zone.date_of(last),
    };

    match schedule.recurrence {
        Recurrence::Daily => not_generated_today(),
        Recurrence::Weekly => {
            schedule.days_of_week.includes(today.weekday()) && not_generated_today()
        }
        Recurrence::Unknown(_) => false,
    }
}
