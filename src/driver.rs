use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::{debug, info, warn};

use crate::alarm::matcher::{AlarmMatcher, FireEvent};
use crate::alarm::model::AlarmId;
use crate::clock::Clock;

const STOP_POLL: Duration = Duration::from_millis(50);

/// Runs [`AlarmMatcher::tick`] on a dedicated thread at a fixed period and forwards fire
/// events over a channel. Network work happens on the receiving side, so a slow backend
/// never delays a tick. Dropping the driver stops and joins the thread.
pub struct TickDriver {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl TickDriver {
    pub fn start(
        matcher: Arc<Mutex<AlarmMatcher>>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        events: Sender<FireEvent>,
    ) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = Arc::clone(&stop);
        let join = thread::Builder::new()
            .name("alarm-tick".to_string())
            .spawn(move || run_tick_loop(matcher, clock, interval, events, stop_for_thread))
            .context("failed to spawn tick thread")?;
        info!("tick driver started ({} ms period)", interval.as_millis());
        Ok(Self {
            stop,
            join: Some(join),
        })
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.join
            .as_ref()
            .is_some_and(|join| !join.is_finished())
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            let _ = join.join();
            debug!("tick driver stopped");
        }
    }
}

impl Drop for TickDriver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_tick_loop(
    matcher: Arc<Mutex<AlarmMatcher>>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    events: Sender<FireEvent>,
    stop: Arc<AtomicBool>,
) {
    while !stop.load(Ordering::Relaxed) {
        let started = Instant::now();
        let now = clock.now();
        let fired = match matcher.lock() {
            Ok(mut guard) => guard.tick(&now),
            Err(poisoned) => poisoned.into_inner().tick(&now),
        };

        for event in fired {
            info!("alarm {} fired at {}", event.id, event.minute.format("%H:%M"));
            if events.send(event).is_err() {
                warn!("fire event receiver is gone, stopping tick driver");
                return;
            }
        }

        let deadline = started + interval;
        while !stop.load(Ordering::Relaxed) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            thread::sleep(remaining.min(STOP_POLL));
        }
    }
}

/// The device has one speaker: at most one alarm rings at a time.
#[derive(Debug, Default)]
pub struct RingSlot {
    ringing: Option<AlarmId>,
}

impl RingSlot {
    /// Claims the slot for `id`. Returns false, leaving the current alarm ringing, when the
    /// slot is already taken.
    pub fn try_ring(&mut self, id: &AlarmId) -> bool {
        if self.ringing.is_some() {
            return false;
        }
        self.ringing = Some(id.clone());
        true
    }

    pub fn current(&self) -> Option<&AlarmId> {
        self.ringing.as_ref()
    }

    pub fn clear(&mut self) -> Option<AlarmId> {
        self.ringing.take()
    }
}
