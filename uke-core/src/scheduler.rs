//! # Lookahead Scheduler
//!
//! Coarse timers jitter by tens of milliseconds; the audio clock does not.
//! The scheduler therefore separates *when to check* from *when to sound*:
//! a timer thread wakes every `lookahead_ms`, and on each wake-up every event
//! due before `now + schedule_ahead` is handed to the audio engine stamped
//! with its exact clock time.
//!
//! What an event *means* (a click, a step) is a [`SchedulePolicy`]; the
//! metronome and the sequencer are thin policies over the same loop.

use crate::engine::{AudioEngine, ManualEngine, Sound};
use crate::lock;
use crossbeam_channel::{RecvTimeoutError, Sender};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Shortest period a policy may ask for; stops a zero period from spinning.
const MIN_PERIOD: f64 = 0.001;

/// Timing of the polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LookaheadConfig {
    /// Milliseconds between polls of the coarse timer.
    pub lookahead_ms: u64,
    /// Seconds ahead of the audio clock that events are scheduled.
    pub schedule_ahead: f64,
    /// Delay before the first event, so it is never in the past.
    pub start_offset: f64,
}

impl Default for LookaheadConfig {
    fn default() -> Self {
        Self {
            lookahead_ms: 25,
            schedule_ahead: 0.12,
            start_offset: 0.05,
        }
    }
}

/// Whether a scheduled component is producing events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportStatus {
    #[default]
    Stopped,
    Running,
}

/// Rounds a user-supplied tempo or count into `[min, max]`.
///
/// NaN falls back to `min`; infinities saturate.
pub fn round_clamped(value: f64, min: u32, max: u32) -> u32 {
    if value.is_nan() {
        return min;
    }
    value.round().clamp(f64::from(min), f64::from(max)) as u32
}

/// A point in audio-clock time at which something was scheduled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerEvent {
    /// Position in the run, starting at 0 on every start.
    pub index: u64,
    /// Audio clock time in seconds.
    pub when: f64,
}

/// Per-component behaviour layered on the lookahead loop.
///
/// The policy doubles as the component's parameter cell: it is shared with
/// the caller behind a mutex and read at every event, so parameter changes
/// apply from the next scheduled event on.
pub trait SchedulePolicy: Send + 'static {
    /// Seconds from the event just emitted to the next one.
    fn period(&self) -> f64;

    /// Resets per-run state before the first event.
    fn on_start(&mut self) {}

    fn on_stop(&mut self) {}

    /// Emits one event, usually by scheduling a sound on `engine`.
    fn on_event(&mut self, event: SchedulerEvent, engine: &dyn AudioEngine);
}

/// The scheduling state machine, free of threads and timers.
#[derive(Debug, Clone, Default)]
pub struct Lookahead {
    config: LookaheadConfig,
    next_event_time: f64,
    index: u64,
}

impl Lookahead {
    pub fn new(config: LookaheadConfig) -> Self {
        Self {
            config,
            next_event_time: 0.0,
            index: 0,
        }
    }

    pub fn start(&mut self, now: f64) {
        self.next_event_time = now + self.config.start_offset;
        self.index = 0;
    }

    /// Emits every event due before the horizon and returns how many.
    ///
    /// After a stall all missed events are emitted back to back; none are
    /// skipped, so indices stay contiguous.
    pub fn poll<P: SchedulePolicy + ?Sized>(&mut self, now: f64, policy: &mut P, engine: &dyn AudioEngine) -> usize {
        let horizon = now + self.config.schedule_ahead;
        let mut emitted = 0;
        while self.next_event_time < horizon {
            let event = SchedulerEvent {
                index: self.index,
                when: self.next_event_time,
            };
            if event.when < now {
                debug!("[SCHEDULER] Event {} is {:.3}s late", event.index, now - event.when);
            }
            policy.on_event(event, engine);

            let period = policy.period();
            self.next_event_time += if period.is_finite() { period.max(MIN_PERIOD) } else { MIN_PERIOD };
            self.index += 1;
            emitted += 1;
        }
        emitted
    }

    pub fn reset(&mut self) {
        self.next_event_time = 0.0;
        self.index = 0;
    }

    pub fn next_event_time(&self) -> f64 {
        self.next_event_time
    }

    /// Index the next emitted event will carry.
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn config(&self) -> &LookaheadConfig {
        &self.config
    }
}

/// Coarse timer thread management structure.
#[derive(Debug)]
struct TimerWorker {
    shutdown_tx: Sender<()>,
    thread_handle: Option<JoinHandle<()>>,
}

/// Runs a [`Lookahead`] on a dedicated timer thread against an engine clock.
pub struct LookaheadScheduler<P: SchedulePolicy> {
    engine: Arc<dyn AudioEngine>,
    policy: Arc<Mutex<P>>,
    config: LookaheadConfig,
    worker: Option<TimerWorker>,
}

impl<P: SchedulePolicy> LookaheadScheduler<P> {
    pub fn new(engine: Arc<dyn AudioEngine>, policy: P, config: LookaheadConfig) -> Self {
        Self {
            engine,
            policy: Arc::new(Mutex::new(policy)),
            config,
            worker: None,
        }
    }

    /// Shared handle on the policy, for live parameter changes.
    pub fn policy(&self) -> &Arc<Mutex<P>> {
        &self.policy
    }

    pub fn engine(&self) -> &Arc<dyn AudioEngine> {
        &self.engine
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    pub fn status(&self) -> TransportStatus {
        if self.is_running() {
            TransportStatus::Running
        } else {
            TransportStatus::Stopped
        }
    }

    /// Starts the timer thread. Does nothing when already running.
    pub fn start(&mut self) {
        if self.worker.is_some() {
            return;
        }

        lock(&self.policy).on_start();
        let mut lookahead = Lookahead::new(self.config);
        lookahead.start(self.engine.current_time());

        let engine = Arc::clone(&self.engine);
        let policy = Arc::clone(&self.policy);
        let interval = Duration::from_millis(self.config.lookahead_ms.max(1));
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);

        let thread_handle = thread::spawn(move || {
            loop {
                let now = engine.current_time();
                {
                    let mut policy = lock(&policy);
                    lookahead.poll(now, &mut *policy, engine.as_ref());
                }
                match shutdown_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            debug!("[SCHEDULER] Timer thread finished after {} events", lookahead.index());
        });

        self.worker = Some(TimerWorker {
            shutdown_tx,
            thread_handle: Some(thread_handle),
        });
        info!("[SCHEDULER] Started, polling every {} ms", self.config.lookahead_ms);
    }

    /// Runs the policy offline for `seconds` of clock time against a
    /// [`ManualEngine`], polling at the configured cadence, and returns what
    /// would have been played.
    ///
    /// Refuses while the real-time loop is running.
    pub fn simulate(&self, seconds: f64) -> Vec<(f64, Sound)> {
        if self.is_running() {
            warn!("[SCHEDULER] Ignoring simulation while running");
            return Vec::new();
        }

        let engine = ManualEngine::new();
        let step = self.config.lookahead_ms.max(1) as f64 / 1000.0;
        let mut lookahead = Lookahead::new(self.config);
        let mut policy = lock(&self.policy);

        policy.on_start();
        lookahead.start(engine.current_time());
        while engine.current_time() < seconds {
            lookahead.poll(engine.current_time(), &mut *policy, &engine);
            engine.advance(step);
        }
        policy.on_stop();

        engine
            .take_scheduled()
            .into_iter()
            .filter(|(when, _)| *when < seconds)
            .collect()
    }

    /// Stops scheduling new events; already scheduled sounds still play.
    ///
    /// Returns once the timer thread has exited. Safe to call from any state.
    pub fn stop(&mut self) {
        let Some(mut worker) = self.worker.take() else {
            return;
        };
        let _ = worker.shutdown_tx.send(());
        if let Some(handle) = worker.thread_handle.take() {
            if handle.join().is_err() {
                error!("[SCHEDULER] Timer thread panicked");
            }
        }
        lock(&self.policy).on_stop();
        info!("[SCHEDULER] Stopped");
    }
}

impl<P: SchedulePolicy> Drop for LookaheadScheduler<P> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fixed-period policy that records every event it sees.
    struct Recorder {
        period: f64,
        events: Vec<SchedulerEvent>,
    }

    impl Recorder {
        fn new(period: f64) -> Self {
            Self {
                period,
                events: Vec::new(),
            }
        }
    }

    impl SchedulePolicy for Recorder {
        fn period(&self) -> f64 {
            self.period
        }

        fn on_start(&mut self) {
            self.events.clear();
        }

        fn on_event(&mut self, event: SchedulerEvent, engine: &dyn AudioEngine) {
            self.events.push(event);
            engine.schedule(event.when, Sound::Click { accent: false, volume: 1.0 });
        }
    }

    #[test]
    fn test_first_event_is_offset_from_start() {
        let engine = ManualEngine::new();
        engine.set_time(10.0);
        let mut lookahead = Lookahead::new(LookaheadConfig::default());
        let mut policy = Recorder::new(0.5);

        lookahead.start(engine.current_time());
        let emitted = lookahead.poll(engine.current_time(), &mut policy, &engine);

        assert_eq!(emitted, 1);
        assert_eq!(policy.events[0].index, 0);
        assert!((policy.events[0].when - 10.05).abs() < 1e-9);
        assert!((lookahead.next_event_time() - 10.55).abs() < 1e-9);
    }

    #[test]
    fn test_regular_polling_schedules_each_event_once() {
        let engine = ManualEngine::new();
        let mut lookahead = Lookahead::new(LookaheadConfig::default());
        let mut policy = Recorder::new(0.1);

        lookahead.start(0.0);
        for _ in 0..400 {
            lookahead.poll(engine.current_time(), &mut policy, &engine);
            engine.advance(0.025);
        }

        // 10 s of polling covers events up to now + horizon.
        let times: Vec<f64> = policy.events.iter().map(|e| e.when).collect();
        assert!(times.windows(2).all(|w| w[1] > w[0]));
        for (i, event) in policy.events.iter().enumerate() {
            assert_eq!(event.index, i as u64);
            assert!((event.when - (0.05 + 0.1 * i as f64)).abs() < 1e-9);
        }
        assert!(policy.events.len() >= 90);

        // Nothing was handed to the engine in the past.
        for (i, (start, _)) in engine.scheduled().iter().enumerate() {
            assert!((start - policy.events[i].when).abs() < 1e-9);
        }
    }

    #[test]
    fn test_stalled_timer_catches_up_without_skipping() {
        let engine = ManualEngine::new();
        let config = LookaheadConfig::default();
        let mut lookahead = Lookahead::new(config);
        let mut policy = Recorder::new(0.1);

        lookahead.start(0.0);
        lookahead.poll(0.0, &mut policy, &engine);
        let before = policy.events.len();

        // The timer is starved for 500 ms.
        engine.set_time(0.5);
        let emitted = lookahead.poll(engine.current_time(), &mut policy, &engine);

        assert!(emitted >= 5);
        assert_eq!(policy.events.len(), before + emitted);
        for (i, event) in policy.events.iter().enumerate() {
            assert_eq!(event.index, i as u64);
        }
        // Everything inside the horizon went out; the next one is beyond it.
        let horizon = 0.5 + config.schedule_ahead;
        assert!(policy.events.iter().all(|e| e.when < horizon));
        assert!(lookahead.next_event_time() >= horizon);

        // Late events sounded immediately, on-time ones at their slot.
        for (start, _) in engine.scheduled() {
            assert!(start >= 0.05 - 1e-9);
        }
        assert!(engine.scheduled().iter().skip(before).any(|(start, _)| *start == 0.5));
    }

    #[test]
    fn test_period_change_applies_to_next_event() {
        let engine = ManualEngine::new();
        let mut lookahead = Lookahead::new(LookaheadConfig::default());
        let mut policy = Recorder::new(0.1);

        lookahead.start(0.0);
        lookahead.poll(0.0, &mut policy, &engine);
        policy.period = 0.2;
        engine.set_time(0.4);
        lookahead.poll(0.4, &mut policy, &engine);

        let times: Vec<f64> = policy.events.iter().map(|e| e.when).collect();
        // The first gap was fixed when event 0 was emitted.
        assert!((times[1] - times[0] - 0.1).abs() < 1e-9);
        assert!((times[2] - times[1] - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_period_does_not_spin() {
        let engine = ManualEngine::new();
        let mut lookahead = Lookahead::new(LookaheadConfig::default());
        let mut policy = Recorder::new(f64::NAN);

        lookahead.start(0.0);
        let emitted = lookahead.poll(0.0, &mut policy, &engine);
        assert!(emitted > 0 && emitted < 200);
    }

    #[test]
    fn test_round_clamped() {
        assert_eq!(round_clamped(119.6, 30, 240), 120);
        assert_eq!(round_clamped(10.0, 30, 240), 30);
        assert_eq!(round_clamped(1000.0, 30, 240), 240);
        assert_eq!(round_clamped(f64::NAN, 30, 240), 30);
        assert_eq!(round_clamped(f64::INFINITY, 1, 12), 12);
    }

    #[test]
    fn test_simulate_matches_polling() {
        let scheduler = LookaheadScheduler::new(Arc::new(ManualEngine::new()), Recorder::new(0.5), LookaheadConfig::default());

        let sounds = scheduler.simulate(2.0);
        let times: Vec<f64> = sounds.iter().map(|(when, _)| *when).collect();
        assert_eq!(times.len(), 4);
        for (i, when) in times.iter().enumerate() {
            assert!((when - (0.05 + 0.5 * i as f64)).abs() < 1e-9);
        }
        assert_eq!(lock(scheduler.policy()).events.len(), 5);
    }

    #[test]
    fn test_threaded_scheduler_start_stop() {
        let engine = Arc::new(ManualEngine::new());
        let mut scheduler = LookaheadScheduler::new(engine.clone(), Recorder::new(0.05), LookaheadConfig::default());

        scheduler.stop();
        scheduler.start();
        assert_eq!(scheduler.status(), TransportStatus::Running);
        std::thread::sleep(Duration::from_millis(60));
        engine.advance(0.2);
        std::thread::sleep(Duration::from_millis(60));
        scheduler.stop();
        assert!(!scheduler.is_running());

        let count = lock(scheduler.policy()).events.len();
        assert!(count >= 2);

        // No new events once stopped, however far the clock runs.
        engine.advance(5.0);
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(lock(scheduler.policy()).events.len(), count);
        scheduler.stop();
    }
}
