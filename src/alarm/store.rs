use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Weekday;
use log::{debug, error, info, warn};

use crate::alarm::matcher::AlarmMatcher;
use crate::alarm::model::{Alarm, AlarmId, AlarmPatch, AlarmTime, NewAlarm};
use crate::error::{ControlError, FieldError};
use crate::transport::AlarmBackend;

/// Result of a bulk operation: how many alarms went through, and the first failure if any.
#[derive(Debug, Default)]
pub struct BulkOutcome {
    pub succeeded: usize,
    pub failed: usize,
    pub first_error: Option<ControlError>,
}

impl BulkOutcome {
    fn record(&mut self, result: Result<(), ControlError>) {
        match result {
            Ok(()) => self.succeeded += 1,
            Err(err) => {
                self.failed += 1;
                if self.first_error.is_none() {
                    self.first_error = Some(err);
                }
            }
        }
    }
}

/// The client-side mirror of the backend's alarms.
///
/// Mutations are confirm-then-commit: the backend is called first and only the record it
/// returns is written into the mirror. A transport failure leaves the mirror untouched; a
/// not-found answer drops the stale local copy. Once [`AlarmStore::close`] has been called,
/// late responses are discarded.
#[derive(Clone)]
pub struct AlarmStore {
    backend: Arc<dyn AlarmBackend>,
    matcher: Arc<Mutex<AlarmMatcher>>,
    open: Arc<AtomicBool>,
}

impl AlarmStore {
    pub fn new(backend: Arc<dyn AlarmBackend>) -> Self {
        Self {
            backend,
            matcher: Arc::new(Mutex::new(AlarmMatcher::default())),
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Shared handle for the tick driver.
    pub fn matcher(&self) -> Arc<Mutex<AlarmMatcher>> {
        Arc::clone(&self.matcher)
    }

    pub fn snapshot(&self) -> Vec<Alarm> {
        self.lock().export_alarms()
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::Relaxed);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }

    pub fn refresh(&self) -> Result<Vec<Alarm>, ControlError> {
        let alarms = self
            .backend
            .list_alarms()
            .inspect_err(|err| error!("fetching alarms failed: {err}"))?;
        if self.is_open() {
            self.lock().replace_all(alarms.clone());
        } else {
            debug!("discarding alarm list received after close");
        }
        Ok(alarms)
    }

    pub fn fetch(&self, id: &AlarmId) -> Result<Alarm, ControlError> {
        let result = self.backend.get_alarm(id);
        self.commit(id, "fetching", result)
    }

    pub fn add_alarm(&self, alarm: NewAlarm) -> Result<Alarm, ControlError> {
        let created = self
            .backend
            .create_alarm(&alarm)
            .inspect_err(|err| error!("creating alarm at {} failed: {err}", alarm.time))?;
        info!("alarm {} created for {}", created.id, created.time);
        if self.is_open() {
            self.lock().upsert(created.clone());
        } else {
            debug!("discarding created alarm {} received after close", created.id);
        }
        Ok(created)
    }

    pub fn set_time(&self, id: &AlarmId, time: AlarmTime) -> Result<Alarm, ControlError> {
        let patch = AlarmPatch {
            time: Some(time),
            ..AlarmPatch::default()
        };
        self.update(id, &patch)
    }

    /// The new weekday set is computed from the mirror, so the alarm must be known locally.
    pub fn toggle_weekday(&self, id: &AlarmId, day: Weekday) -> Result<Alarm, ControlError> {
        let current = self
            .lock()
            .get(id)
            .map(|alarm| alarm.weekdays)
            .ok_or_else(|| ControlError::NotFound { id: id.clone() })?;
        let patch = AlarmPatch {
            weekdays: Some(current.toggled(day)),
            ..AlarmPatch::default()
        };
        self.update(id, &patch)
    }

    pub fn update(&self, id: &AlarmId, patch: &AlarmPatch) -> Result<Alarm, ControlError> {
        if patch.is_empty() {
            return Err(ControlError::Validation(vec![FieldError {
                field: "alarm",
                message: "nothing to update".to_string(),
            }]));
        }
        let result = self.backend.update_alarm(id, patch);
        self.commit(id, "updating", result)
    }

    pub fn toggle_alarm(&self, id: &AlarmId) -> Result<Alarm, ControlError> {
        let result = self.backend.toggle_alarm(id);
        self.commit(id, "toggling", result)
    }

    pub fn delete_alarm(&self, id: &AlarmId) -> Result<(), ControlError> {
        match self.backend.delete_alarm(id) {
            Ok(()) => {
                info!("alarm {id} deleted");
                self.drop_local(id);
                Ok(())
            }
            Err(err) if err.is_not_found() => {
                warn!("alarm {id} was already gone on the backend");
                self.drop_local(id);
                Err(err)
            }
            Err(err) => {
                error!("deleting alarm {id} failed: {err}");
                Err(err)
            }
        }
    }

    pub fn delete_all(&self) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for alarm in self.snapshot() {
            outcome.record(self.delete_alarm(&alarm.id));
        }
        outcome
    }

    /// Turns off every active alarm. Already inactive alarms are left alone so the toggle
    /// endpoint cannot switch them back on.
    pub fn set_all_off(&self) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for alarm in self.snapshot().into_iter().filter(|alarm| alarm.active) {
            let patch = AlarmPatch {
                active: Some(false),
                ..AlarmPatch::default()
            };
            outcome.record(self.update(&alarm.id, &patch).map(|_| ()));
        }
        outcome
    }

    fn commit(
        &self,
        id: &AlarmId,
        action: &str,
        result: Result<Alarm, ControlError>,
    ) -> Result<Alarm, ControlError> {
        match result {
            Ok(alarm) => {
                if self.is_open() {
                    self.lock().upsert(alarm.clone());
                } else {
                    debug!("discarding alarm {id} received after close");
                }
                Ok(alarm)
            }
            Err(err) if err.is_not_found() => {
                warn!("{action} alarm {id}: no longer exists, dropping local copy");
                self.drop_local(id);
                Err(err)
            }
            Err(err) => {
                error!("{action} alarm {id} failed: {err}");
                Err(err)
            }
        }
    }

    fn drop_local(&self, id: &AlarmId) {
        if self.is_open() {
            let _ = self.lock().remove(id);
        }
    }

    fn lock(&self) -> MutexGuard<'_, AlarmMatcher> {
        match self.matcher.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
