use std::fmt;

use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Weekdays in storage order, indexed by their stored number (0 = Sunday).
const WEEK: [Weekday; 7] = [
    Weekday::Sun,
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
];

/// Ordered set of weekdays. An empty set means every day, not no day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "Vec<i64>")]
pub struct DaysOfWeek {
    mask: u8,
}

impl DaysOfWeek {
    pub fn every_day() -> Self {
        Self::default()
    }

    pub fn from_numbers(days: &[i64]) -> Result<Self, String> {
        let mut mask = 0u8;
        for &day in days {
            if !(0..=6).contains(&day) {
                return Err(format!("day {day} is outside 0..=6"));
            }
            mask |= 1 << day;
        }
        Ok(Self { mask })
    }

    pub fn is_empty(&self) -> bool {
        self.mask == 0
    }

    pub fn len(&self) -> usize {
        self.mask.count_ones() as usize
    }

    pub fn includes(&self, day: Weekday) -> bool {
        self.is_empty() || self.mask & (1 << day.num_days_from_sunday()) != 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Weekday> + '_ {
        WEEK.iter()
            .copied()
            .filter(|day| self.mask & (1 << day.num_days_from_sunday()) != 0)
    }

    pub fn to_numbers(&self) -> Vec<u8> {
        self.iter().map(|d| d.num_days_from_sunday() as u8).collect()
    }
}

impl TryFrom<Vec<i64>> for DaysOfWeek {
    type Error = String;

    fn try_from(days: Vec<i64>) -> Result<Self, Self::Error> {
        Self::from_numbers(&days)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recurrence {
    Daily,
    Weekly,
    /// Anything else found in storage. Never due.
    Unknown(String),
}

impl Recurrence {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Unknown(other) => other,
        }
    }
}

impl From<&str> for Recurrence {
    fn from(value: &str) -> Self {
        match value {
            "daily" => Self::Daily,
            "weekly" => Self::Weekly,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    pub id: String,
    pub title: String,
    pub child: String,
    /// `Some(0)` is a real priority, distinct from unset.
    pub priority: Option<i64>,
    pub recurrence: Recurrence,
    pub days_of_week: DaysOfWeek,
    pub time_period: String,
    pub active: bool,
    pub last_generated: Option<DateTime<Utc>>,
}

impl Schedule {
    pub fn describe_recurrence(&self) -> String {
        match &self.recurrence {
            Recurrence::Weekly if self.days_of_week.is_empty() => "weekly".to_string(),
            Recurrence::Weekly if self.days_of_week.len() == 7 => "daily".to_string(),
            Recurrence::Weekly => {
                let names: Vec<String> =
                    self.days_of_week.iter().map(|d| d.to_string()).collect();
                format!("weekly: {}", names.join(", "))
            }
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub child: String,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub completed: bool,
    pub schedule: String,
    pub generated_at: DateTime<Utc>,
}

/// A task about to be created; the repository assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub title: String,
    pub child: String,
    pub priority: Option<i64>,
    pub schedule: String,
    pub generated_at: DateTime<Utc>,
}

impl NewTask {
    pub fn from_schedule(schedule: &Schedule, now: DateTime<Utc>) -> Self {
        Self {
            title: schedule.title.clone(),
            child: schedule.child.clone(),
            priority: schedule.priority,
            schedule: schedule.id.clone(),
            generated_at: now,
        }
    }

    pub fn into_task(self, id: String) -> Task {
        Task {
            id,
            title: self.title,
            child: self.child,
            priority: self.priority,
            completed: false,
            schedule: self.schedule,
            generated_at: self.generated_at,
        }
    }
}
