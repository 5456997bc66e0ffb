use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Timelike};
use log::debug;

use crate::alarm::model::{Alarm, AlarmId};

/// Emitted once per alarm per matching minute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FireEvent {
    pub id: AlarmId,
    pub minute: NaiveDateTime,
}

#[derive(Debug, Clone)]
struct TrackedAlarm {
    alarm: Alarm,
    fired_minute: Option<NaiveDateTime>,
}

/// Local mirror of the backend's alarms plus the per-minute fire bookkeeping.
#[derive(Debug, Default)]
pub struct AlarmMatcher {
    alarms: Vec<TrackedAlarm>,
}

impl AlarmMatcher {
    pub fn new(alarms: Vec<Alarm>) -> Self {
        let mut matcher = Self::default();
        matcher.replace_all(alarms);
        matcher
    }

    pub fn tick<Tz: TimeZone>(&mut self, now: &DateTime<Tz>) -> Vec<FireEvent> {
        let minute = truncate_to_minute(now.naive_local());
        let weekday = minute.weekday();
        let mut fired = Vec::new();

        for tracked in &mut self.alarms {
            if tracked.fired_minute.is_some_and(|flagged| flagged != minute) {
                tracked.fired_minute = None;
            }

            let alarm = &tracked.alarm;
            if !alarm.active || !alarm.time.matches(minute.time()) {
                continue;
            }
            if !alarm.weekdays.is_empty() && !alarm.weekdays.contains(weekday) {
                continue;
            }
            if tracked.fired_minute == Some(minute) {
                continue;
            }

            tracked.fired_minute = Some(minute);
            fired.push(FireEvent {
                id: alarm.id.clone(),
                minute,
            });
        }

        if !fired.is_empty() {
            debug!("tick at {minute} matched {} alarm(s)", fired.len());
        }
        fired
    }

    /// Replaces the mirror wholesale. Fire flags survive for alarms whose id and time are
    /// unchanged so a refresh inside a matching minute does not re-fire.
    pub fn replace_all(&mut self, alarms: Vec<Alarm>) {
        let previous = std::mem::take(&mut self.alarms);
        self.alarms = alarms
            .into_iter()
            .map(|alarm| {
                let fired_minute = previous
                    .iter()
                    .find(|old| old.alarm.id == alarm.id && old.alarm.time == alarm.time)
                    .and_then(|old| old.fired_minute);
                TrackedAlarm {
                    alarm,
                    fired_minute,
                }
            })
            .collect();
    }

    /// Inserts or overwrites by id; the incoming record is authoritative.
    pub fn upsert(&mut self, alarm: Alarm) {
        match self.alarms.iter_mut().find(|t| t.alarm.id == alarm.id) {
            Some(tracked) => {
                if tracked.alarm.time != alarm.time {
                    tracked.fired_minute = None;
                }
                tracked.alarm = alarm;
            }
            None => self.alarms.push(TrackedAlarm {
                alarm,
                fired_minute: None,
            }),
        }
    }

    pub fn remove(&mut self, id: &AlarmId) -> Option<Alarm> {
        let index = self.alarms.iter().position(|t| &t.alarm.id == id)?;
        Some(self.alarms.remove(index).alarm)
    }

    pub fn get(&self, id: &AlarmId) -> Option<&Alarm> {
        self.alarms
            .iter()
            .find(|t| &t.alarm.id == id)
            .map(|t| &t.alarm)
    }

    #[cfg(test)]
    pub fn has_fired_this_minute(&self, id: &AlarmId) -> bool {
        self.alarms
            .iter()
            .any(|t| &t.alarm.id == id && t.fired_minute.is_some())
    }

    pub fn export_alarms(&self) -> Vec<Alarm> {
        self.alarms.iter().map(|t| t.alarm.clone()).collect()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.alarms.is_empty()
    }
}

fn truncate_to_minute(value: NaiveDateTime) -> NaiveDateTime {
    value
        .with_second(0)
        .and_then(|v| v.with_nanosecond(0))
        .unwrap_or(value)
}
