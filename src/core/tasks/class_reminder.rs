// src/core/tasks/class_reminder.rs

//! Periodically reminds connected students of classes about to start.

use crate::config::RemindersConfig;
use crate::core::dispatcher::{Dispatcher, PreparedEnvelope};
use crate::core::errors::NotifierError;
use crate::core::metrics;
use crate::core::protocol::{ClassReminderPayload, Envelope};
use crate::core::store::{ScheduleStore, ScheduledEvent};
use chrono::{Datelike, Duration as ChronoDuration, Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// The latest time a reminder window may end. Windows never cross midnight.
const END_OF_DAY: (u32, u32) = (23, 59);

/// Counters for one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Events returned by the store for the window.
    pub events_matched: usize,
    /// Events dropped as invalid or whose students could not be resolved.
    pub events_skipped: usize,
    /// Reminders accepted by a student's outbound queue.
    pub delivered: usize,
    /// Reminders for students that were not connected or whose queue was full.
    pub not_delivered: usize,
}

/// The `[from, to]` time-of-day range a scan looks at, minute precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderWindow {
    pub date: NaiveDate,
    pub from: NaiveTime,
    pub to: NaiveTime,
}

impl ReminderWindow {
    /// Computes the window starting at `now` and spanning `lookahead`, clamped to the
    /// end of the current day.
    pub fn starting_at(now: NaiveDateTime, lookahead: ChronoDuration) -> Self {
        let from = truncate_to_minute(now.time());
        let end = now + lookahead;
        let to = if end.date() != now.date() {
            NaiveTime::from_hms_opt(END_OF_DAY.0, END_OF_DAY.1, 0).unwrap_or_default()
        } else {
            truncate_to_minute(end.time())
        };
        Self {
            date: now.date(),
            from,
            to,
        }
    }
}

fn truncate_to_minute(t: NaiveTime) -> NaiveTime {
    NaiveTime::from_hms_opt(t.hour(), t.minute(), 0).unwrap_or(t)
}

/// Builds the human-readable reminder text for a class `minutes` away.
pub fn reminder_message(minutes: i64) -> String {
    match minutes {
        m if m <= 0 => "Your class is starting now".to_string(),
        1 => "Your class starts in 1 minute".to_string(),
        m => format!("Your class starts in {m} minutes"),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ReminderKey {
    module_code: String,
    start_time: String,
    level: String,
    identity: String,
}

/// Remembers which students were already reminded of which class today.
#[derive(Debug, Default)]
pub struct ReminderLedger {
    day: Option<NaiveDate>,
    sent: HashSet<ReminderKey>,
}

impl ReminderLedger {
    /// Starts tracking `date`, forgetting everything recorded on earlier days.
    fn roll_to(&mut self, date: NaiveDate) {
        if self.day != Some(date) {
            if !self.sent.is_empty() {
                debug!(
                    entries = self.sent.len(),
                    "Pruning reminder ledger for a new day."
                );
            }
            self.sent.clear();
            self.day = Some(date);
        }
    }

    fn contains(&self, key: &ReminderKey) -> bool {
        self.sent.contains(key)
    }

    fn record(&mut self, key: ReminderKey) {
        self.sent.insert(key);
    }

    pub fn len(&self) -> usize {
        self.sent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.is_empty()
    }
}

/// The class reminder background task.
pub struct ClassReminderTask {
    dispatcher: Dispatcher,
    store: Arc<dyn ScheduleStore>,
    config: RemindersConfig,
    ledger: ReminderLedger,
}

impl ClassReminderTask {
    pub fn new(
        dispatcher: Dispatcher,
        store: Arc<dyn ScheduleStore>,
        config: RemindersConfig,
    ) -> Self {
        Self {
            dispatcher,
            store,
            config,
            ledger: ReminderLedger::default(),
        }
    }

    pub fn ledger(&self) -> &ReminderLedger {
        &self.ledger
    }

    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            tick_interval = ?self.config.tick_interval,
            lookahead = ?self.config.lookahead,
            "Class reminder task started."
        );
        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    // Errors are recorded by `scan_at`; the next tick starts fresh.
                    let _ = self.scan_at(Local::now().naive_local()).await;
                }
                _ = shutdown_rx.recv() => {
                    info!("Class reminder task shutting down.");
                    return;
                }
            }
        }
    }

    /// Runs one scan as if the local wall clock read `now`.
    ///
    /// A failed schedule query aborts the scan and is returned. Every other problem
    /// only affects the event or student it concerns.
    pub async fn scan_at(&mut self, now: NaiveDateTime) -> Result<ScanReport, NotifierError> {
        let _timer = metrics::REMINDER_SCAN_SECONDS.start_timer();
        let lookahead = ChronoDuration::from_std(self.config.lookahead)
            .unwrap_or_else(|_| ChronoDuration::minutes(15));
        let window = ReminderWindow::starting_at(now, lookahead);
        self.ledger.roll_to(window.date);

        debug!(
            day = %window.date.weekday(),
            from = %window.from.format("%H:%M"),
            to = %window.to.format("%H:%M"),
            "Checking for upcoming classes."
        );

        let events = match self
            .store
            .find_schedules(window.date.weekday(), window.from, window.to)
            .await
        {
            Ok(events) => events,
            Err(e) => {
                metrics::REMINDER_SCANS_TOTAL
                    .with_label_values(&["store_error"])
                    .inc();
                warn!("Reminder scan aborted, schedule query failed: {}", e);
                return Err(e);
            }
        };

        let mut report = ScanReport {
            events_matched: events.len(),
            ..Default::default()
        };

        for event in &events {
            let start = match validate(event) {
                Ok(start) => start,
                Err(e) => {
                    metrics::INVALID_SCHEDULE_RECORDS_TOTAL.inc();
                    warn!("Skipping schedule record: {}", e);
                    report.events_skipped += 1;
                    continue;
                }
            };

            let students = match self.store.find_students_by_level(&event.level).await {
                Ok(students) => students,
                Err(e) => {
                    warn!(
                        module_code = %event.module_code,
                        level = %event.level,
                        "Could not resolve students for class: {}",
                        e
                    );
                    report.events_skipped += 1;
                    continue;
                }
            };
            if students.is_empty() {
                debug!(level = %event.level, "No students found for level.");
                continue;
            }

            let minutes = (start - window.from).num_minutes();
            let envelope = Envelope::ClassReminder(ClassReminderPayload {
                module_code: event.module_code.clone(),
                module_name: event.module_name.clone(),
                start_time: event.start_time.clone(),
                room: event.room.clone(),
                message: reminder_message(minutes),
                level: event.level.clone(),
            });
            let Some(prepared) = PreparedEnvelope::new(&envelope) else {
                report.events_skipped += 1;
                continue;
            };

            let (delivered, not_delivered) = self.remind_students(event, &students, &prepared);
            report.delivered += delivered;
            report.not_delivered += not_delivered;

            info!(
                module_code = %event.module_code,
                sent = delivered,
                failed = not_delivered,
                total_students = students.len(),
                "Class reminder dispatched."
            );
        }

        metrics::REMINDER_SCANS_TOTAL.with_label_values(&["ok"]).inc();
        Ok(report)
    }

    fn remind_students(
        &mut self,
        event: &ScheduledEvent,
        students: &[String],
        prepared: &PreparedEnvelope,
    ) -> (usize, usize) {
        let mut delivered = 0;
        let mut not_delivered = 0;
        for identity in students {
            let key = ReminderKey {
                module_code: event.module_code.clone(),
                start_time: event.start_time.clone(),
                level: event.level.clone(),
                identity: identity.clone(),
            };
            if self.config.dedupe && self.ledger.contains(&key) {
                continue;
            }
            if self.dispatcher.send_prepared(identity, prepared) {
                metrics::REMINDERS_TOTAL.with_label_values(&["delivered"]).inc();
                delivered += 1;
                if self.config.dedupe {
                    self.ledger.record(key);
                }
            } else {
                metrics::REMINDERS_TOTAL
                    .with_label_values(&["not_delivered"])
                    .inc();
                debug!(identity = %identity, module_code = %event.module_code, "Reminder not delivered.");
                not_delivered += 1;
            }
        }
        (delivered, not_delivered)
    }
}

/// Checks the fields a reminder needs and returns the parsed start time.
fn validate(event: &ScheduledEvent) -> Result<NaiveTime, NotifierError> {
    if event.module_code.trim().is_empty() {
        return Err(NotifierError::InvalidRecord(format!(
            "missing module code (start_time '{}', level '{}')",
            event.start_time, event.level
        )));
    }
    if event.start_time.trim().is_empty() {
        return Err(NotifierError::InvalidRecord(format!(
            "missing start time for module '{}'",
            event.module_code
        )));
    }
    NaiveTime::parse_from_str(event.start_time.trim(), "%H:%M").map_err(|_| {
        NotifierError::InvalidRecord(format!(
            "malformed start time '{}' for module '{}'",
            event.start_time, event.module_code
        ))
    })
}
