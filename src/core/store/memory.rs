// src/core/store/memory.rs

//! An in-process `ScheduleStore`, optionally seeded from a JSON file.

use super::{ScheduleStore, ScheduledEvent, StudentRecord, weekday_name};
use crate::core::errors::NotifierError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveTime, Weekday};
use parking_lot::RwLock;
use serde::Deserialize;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

/// The on-disk seed layout: `{"schedules": [...], "students": [...]}`.
#[derive(Debug, Default, Deserialize)]
struct SeedFile {
    #[serde(default)]
    schedules: Vec<ScheduledEvent>,
    #[serde(default)]
    students: Vec<StudentRecord>,
}

/// Schedules and students held in memory.
///
/// Matching mirrors a document-store range query over zero-padded `HH:MM` strings:
/// the stored `start_time` is compared as a string, so records with a malformed time
/// simply fall outside the range or are rejected later by the reminder task.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    schedules: RwLock<Vec<ScheduledEvent>>,
    students: RwLock<Vec<StudentRecord>>,
    failures_remaining: AtomicUsize,
    student_failures_remaining: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads schedules and students from a JSON seed file.
    pub fn from_seed_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read seed file: {}", path.display()))?;
        let seed: SeedFile = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse seed file: {}", path.display()))?;
        Ok(Self {
            schedules: RwLock::new(seed.schedules),
            students: RwLock::new(seed.students),
            failures_remaining: AtomicUsize::new(0),
            student_failures_remaining: AtomicUsize::new(0),
        })
    }

    pub fn insert_schedule(&self, event: ScheduledEvent) {
        self.schedules.write().push(event);
    }

    pub fn insert_student(&self, id: impl Into<String>, level: impl Into<String>) {
        self.students.write().push(StudentRecord {
            id: id.into(),
            level: level.into(),
        });
    }

    pub fn schedule_count(&self) -> usize {
        self.schedules.read().len()
    }

    pub fn student_count(&self) -> usize {
        self.students.read().len()
    }

    /// Makes the next `n` queries fail with a store error.
    pub fn fail_next_queries(&self, n: usize) {
        self.failures_remaining.store(n, Ordering::Release);
    }

    /// Makes the next `n` student lookups fail while schedule queries keep working.
    pub fn fail_next_student_queries(&self, n: usize) {
        self.student_failures_remaining.store(n, Ordering::Release);
    }

    fn take_failure(&self) -> Result<(), NotifierError> {
        take_from(&self.failures_remaining)
    }
}

fn take_from(counter: &AtomicUsize) -> Result<(), NotifierError> {
    let failed = counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        .is_ok();
    if failed {
        Err(NotifierError::Store("injected query failure".to_string()))
    } else {
        Ok(())
    }
}

#[async_trait]
impl ScheduleStore for InMemoryStore {
    async fn find_schedules(
        &self,
        day: Weekday,
        from: NaiveTime,
        to: NaiveTime,
    ) -> Result<Vec<ScheduledEvent>, NotifierError> {
        self.take_failure()?;
        let day_name = weekday_name(day);
        let from = from.format("%H:%M").to_string();
        let to = to.format("%H:%M").to_string();
        Ok(self
            .schedules
            .read()
            .iter()
            .filter(|event| event.day.eq_ignore_ascii_case(day_name))
            .filter(|event| event.start_time.as_str() >= from.as_str())
            .filter(|event| event.start_time.as_str() <= to.as_str())
            .cloned()
            .collect())
    }

    async fn find_students_by_level(&self, level: &str) -> Result<Vec<String>, NotifierError> {
        self.take_failure()?;
        take_from(&self.student_failures_remaining)?;
        Ok(self
            .students
            .read()
            .iter()
            .filter(|student| student.level == level)
            .map(|student| student.id.clone())
            .collect())
    }
}
