//! # Pitch Tracker Module
//!
//! Owns a live capture session and turns its frames into a smoothed,
//! continuously updated [`PitchReading`].
//!
//! ## Pipeline (one acquisition tick per frame)
//! 1. RMS gate: quiet frames publish "no pitch" without running YIN
//! 2. YIN estimate
//! 3. Confidence gate: only estimates above the acceptance probability
//!    enter the history
//! 4. Median over the recent history, which rejects single-frame octave jumps
//!
//! ## Lifecycle
//! `Idle → Starting → Running`, or `Idle → Starting → Error` when the device
//! cannot be opened. `stop()` returns to `Idle` from any state.

use crate::audio::{CaptureBackend, CaptureConfig, CaptureSession};
use crate::error::DeviceResult;
use crate::lock;
use crate::notify::Subscribers;
use crate::pitch::{PitchEstimate, PitchEstimator, Yin, YinOptions, compute_rms, median};
use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Minimum number of accepted estimates before the median is used.
const MIN_MEDIAN_HISTORY: usize = 3;

/// Options for the acquisition pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerOptions {
    /// Samples per analysed frame.
    pub frame_size: usize,
    /// Silence floor; frames below it never reach the estimator.
    pub min_rms: f32,
    pub yin: YinOptions,
    /// Number of accepted estimates the median is taken over.
    pub smoothing_window: usize,
    /// Estimates must be strictly more confident than this to be accepted.
    pub acceptance: f32,
    pub highpass_hz: f32,
    pub lowpass_hz: f32,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            frame_size: 4096,
            min_rms: 0.012,
            yin: YinOptions::default(),
            smoothing_window: 5,
            acceptance: 0.6,
            highpass_hz: 80.0,
            lowpass_hz: 1200.0,
        }
    }
}

impl TrackerOptions {
    fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            frame_size: self.frame_size,
            highpass_hz: self.highpass_hz,
            lowpass_hz: self.lowpass_hz,
        }
    }
}

/// The tracker's publicly observable state.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PitchReading {
    /// Smoothed fundamental, present only while the signal is loud and
    /// the latest estimate is confident.
    pub frequency: Option<f32>,
    pub probability: f32,
    pub rms: f32,
}

/// The per-tick acquisition step, independent of any audio device.
#[derive(Debug)]
pub struct Acquisition<E> {
    estimator: E,
    options: TrackerOptions,
    history: VecDeque<f32>,
}

impl<E: PitchEstimator> Acquisition<E> {
    pub fn new(estimator: E, options: TrackerOptions) -> Self {
        let window = options.smoothing_window.max(1);
        Self {
            estimator,
            options,
            history: VecDeque::with_capacity(window),
        }
    }

    /// Runs one frame through the gate, the estimator and the smoother.
    pub fn process_frame(&mut self, frame: &[f32], sample_rate: u32) -> PitchReading {
        let rms = compute_rms(frame);
        // Written so a NaN level also counts as silence.
        if !(rms >= self.options.min_rms) {
            return PitchReading {
                frequency: None,
                probability: 0.0,
                rms,
            };
        }

        let estimate = self.estimator.estimate(frame, sample_rate);
        self.accept(estimate, rms)
    }

    /// Applies the confidence gate and the median smoother to a raw estimate.
    pub fn accept(&mut self, estimate: PitchEstimate, rms: f32) -> PitchReading {
        let probability = estimate.probability.clamp(0.0, 1.0);
        match estimate.frequency {
            Some(frequency) if probability > self.options.acceptance => {
                self.history.push_back(frequency);
                while self.history.len() > self.options.smoothing_window.max(1) {
                    self.history.pop_front();
                }
                let smoothed = if self.history.len() >= MIN_MEDIAN_HISTORY {
                    let (front, back) = self.history.as_slices();
                    median(&[front, back].concat()).unwrap_or(frequency)
                } else {
                    frequency
                };
                PitchReading {
                    frequency: Some(smoothed),
                    probability,
                    rms,
                }
            }
            _ => PitchReading {
                frequency: None,
                probability,
                rms,
            },
        }
    }

    pub fn history(&self) -> &VecDeque<f32> {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }
}

/// Lifecycle of a [`PitchTracker`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TrackerStatus {
    #[default]
    Idle,
    Starting,
    Running,
    /// The device could not be opened; carries a human-readable message.
    Error(String),
}

/// Audio worker thread management structure.
///
/// Handles the dedicated acquisition thread and provides a way to shut it
/// down synchronously.
#[derive(Debug)]
struct AcquisitionWorker {
    shutdown_tx: Sender<()>,
    thread_handle: Option<JoinHandle<()>>,
}

/// A live, smoothed pitch reading from the microphone.
///
/// Only one tracker should hold the microphone at a time; this is left to
/// the caller.
pub struct PitchTracker<B: CaptureBackend> {
    backend: B,
    options: TrackerOptions,
    status: TrackerStatus,
    session: Option<Box<dyn CaptureSession>>,
    worker: Option<AcquisitionWorker>,
    reading: Arc<Mutex<PitchReading>>,
    subscribers: Arc<Mutex<Subscribers<PitchReading>>>,
}

impl<B: CaptureBackend> PitchTracker<B> {
    pub fn new(backend: B, options: TrackerOptions) -> Self {
        Self {
            backend,
            options,
            status: TrackerStatus::Idle,
            session: None,
            worker: None,
            reading: Arc::new(Mutex::new(PitchReading::default())),
            subscribers: Arc::new(Mutex::new(Subscribers::new())),
        }
    }

    pub fn options(&self) -> &TrackerOptions {
        &self.options
    }

    pub fn status(&self) -> TrackerStatus {
        self.status.clone()
    }

    /// The message of the last failed `start()`, if the tracker is in error.
    pub fn error(&self) -> Option<&str> {
        match &self.status {
            TrackerStatus::Error(msg) => Some(msg.as_str()),
            _ => None,
        }
    }

    /// The most recently published reading.
    pub fn reading(&self) -> PitchReading {
        *lock(&self.reading)
    }

    /// Receives every reading published from now on.
    pub fn subscribe(&self) -> Receiver<PitchReading> {
        lock(&self.subscribers).subscribe()
    }

    /// Opens the microphone and starts the acquisition loop.
    ///
    /// Does nothing when already running. On failure the tracker moves to
    /// [`TrackerStatus::Error`] and stays there until `start()` is called
    /// again; there is no automatic retry.
    pub fn start(&mut self) -> DeviceResult<()> {
        if self.status == TrackerStatus::Running {
            debug!("[TRACKER] start() ignored, already running");
            return Ok(());
        }

        self.status = TrackerStatus::Starting;
        info!("[TRACKER] Starting pitch tracker...");

        let (frames_tx, frames_rx) = crossbeam_channel::bounded::<Vec<f32>>(4);
        let session = match self.backend.open(&self.options.capture_config(), frames_tx) {
            Ok(session) => session,
            Err(e) => {
                warn!("[TRACKER] Could not open the microphone: {}", e);
                self.status = TrackerStatus::Error(e.to_string());
                return Err(e);
            }
        };

        let sample_rate = session.sample_rate();
        let acquisition = Acquisition::new(Yin::new(self.options.yin), self.options);
        self.worker = Some(spawn_worker(
            acquisition,
            sample_rate,
            frames_rx,
            Arc::clone(&self.reading),
            Arc::clone(&self.subscribers),
        ));
        self.session = Some(session);
        self.status = TrackerStatus::Running;
        info!("[TRACKER] Running at {} Hz", sample_rate);
        Ok(())
    }

    /// Tears down the acquisition loop and releases the microphone.
    ///
    /// Safe to call any number of times from any state.
    pub fn stop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            let _ = worker.shutdown_tx.send(());
            if let Some(handle) = worker.thread_handle.take() {
                if handle.join().is_err() {
                    error!("[TRACKER] Acquisition thread panicked");
                }
            }
        }
        if self.session.take().is_some() {
            info!("[TRACKER] Microphone released");
        }
        *lock(&self.reading) = PitchReading::default();
        self.status = TrackerStatus::Idle;
    }
}

impl<B: CaptureBackend> Drop for PitchTracker<B> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_worker<E: PitchEstimator + Send + 'static>(
    mut acquisition: Acquisition<E>,
    sample_rate: u32,
    frames_rx: Receiver<Vec<f32>>,
    reading: Arc<Mutex<PitchReading>>,
    subscribers: Arc<Mutex<Subscribers<PitchReading>>>,
) -> AcquisitionWorker {
    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
    let thread_handle = thread::spawn(move || {
        debug!("[TRACKER] Entering acquisition loop...");
        loop {
            crossbeam_channel::select! {
                recv(frames_rx) -> msg => match msg {
                    Ok(frame) => {
                        let latest = acquisition.process_frame(&frame, sample_rate);
                        *lock(&reading) = latest;
                        lock(&subscribers).publish(&latest);
                    }
                    Err(_) => {
                        debug!("[TRACKER] Frame channel closed");
                        break;
                    }
                },
                recv(shutdown_rx) -> _ => {
                    debug!("[TRACKER] Received shutdown signal");
                    break;
                },
            }
        }
        acquisition.clear_history();
        debug!("[TRACKER] Acquisition loop finished");
    });
    AcquisitionWorker {
        shutdown_tx,
        thread_handle: Some(thread_handle),
    }
}
