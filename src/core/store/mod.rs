// src/core/store/mod.rs

//! The schedule store the class reminder task reads from.
//!
//! Persistence of schedules and students lives outside this crate. The core only
//! needs two read-only queries, expressed by the `ScheduleStore` trait.

use crate::core::errors::NotifierError;
use async_trait::async_trait;
use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

mod memory;

pub use memory::InMemoryStore;

/// A recurring class slot, as stored.
///
/// Fields are kept as the raw stored strings. Checking that the required ones are
/// present and well-formed is the reminder task's job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledEvent {
    #[serde(default)]
    pub module_code: String,
    #[serde(default)]
    pub module_name: String,
    /// Time of day, `HH:MM`.
    #[serde(default)]
    pub start_time: String,
    /// Day-of-week name, e.g. `Monday`.
    #[serde(default)]
    pub day: String,
    #[serde(default, alias = "room_name")]
    pub room: String,
    /// The cohort/level the class is taught to.
    #[serde(default)]
    pub level: String,
}

/// A student as needed for reminder addressing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub id: String,
    pub level: String,
}

/// Read-only queries against the schedule store.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Returns every event on `day` whose start time lies in `[from, to]`.
    async fn find_schedules(
        &self,
        day: Weekday,
        from: NaiveTime,
        to: NaiveTime,
    ) -> Result<Vec<ScheduledEvent>, NotifierError>;

    /// Returns the identities of every student in `level`.
    async fn find_students_by_level(&self, level: &str) -> Result<Vec<String>, NotifierError>;
}

/// Returns the English name of `day`, as stored in schedule records.
pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}
