//! # Pitch Detection Module
//!
//! This module implements the YIN fundamental-frequency estimator used by the
//! tuner, together with the small signal statistics the tracker relies on.
//!
//! ## Features
//! - Difference function and cumulative mean normalized difference (CMND)
//! - Absolute-threshold search that walks to the true local minimum
//! - Global-minimum fallback when nothing crosses the threshold
//! - Parabolic interpolation for sub-sample lag precision
//! - Band limiting: candidates outside the configured range are discarded

use serde::{Deserialize, Serialize};

/// Tuning knobs for [`yin_pitch`].
///
/// The default band covers a ukulele's open strings and the first frets;
/// widen it for other instruments.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct YinOptions {
    /// CMND acceptance threshold; smaller is stricter.
    pub threshold: f32,
    /// Lowest frequency reported, in Hz.
    pub min_frequency: f32,
    /// Highest frequency reported, in Hz.
    pub max_frequency: f32,
}

impl Default for YinOptions {
    fn default() -> Self {
        Self {
            threshold: 0.15,
            min_frequency: 180.0,
            max_frequency: 600.0,
        }
    }
}

/// The outcome of analysing one frame.
///
/// `frequency` is `None` when no fundamental was found or the candidate fell
/// outside the band; `probability` is still reported in the latter case.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PitchEstimate {
    pub frequency: Option<f32>,
    /// Confidence in 0..=1.
    pub probability: f32,
}

impl PitchEstimate {
    pub const NONE: PitchEstimate = PitchEstimate {
        frequency: None,
        probability: 0.0,
    };
}

/// Anything that can turn a frame of samples into a pitch estimate.
pub trait PitchEstimator {
    fn estimate(&mut self, frame: &[f32], sample_rate: u32) -> PitchEstimate;
}

/// YIN estimator that keeps its scratch buffers between frames.
#[derive(Debug, Clone, Default)]
pub struct Yin {
    options: YinOptions,
    diff: Vec<f32>,
    cmnd: Vec<f32>,
}

impl Yin {
    pub fn new(options: YinOptions) -> Self {
        Self {
            options,
            diff: Vec::new(),
            cmnd: Vec::new(),
        }
    }

    pub fn options(&self) -> &YinOptions {
        &self.options
    }
}

impl PitchEstimator for Yin {
    fn estimate(&mut self, frame: &[f32], sample_rate: u32) -> PitchEstimate {
        run_yin(frame, sample_rate, &self.options, &mut self.diff, &mut self.cmnd)
    }
}

/// Estimates the fundamental frequency of one frame with the YIN algorithm.
///
/// # Arguments
/// * `buffer` - Mono samples in [-1, 1]
/// * `sample_rate` - Sample rate in Hz
/// * `options` - Threshold and frequency band
///
/// # Returns
/// * A [`PitchEstimate`]; never fails. Silence and noise come back as
///   `frequency: None`.
pub fn yin_pitch(buffer: &[f32], sample_rate: u32, options: &YinOptions) -> PitchEstimate {
    Yin::new(*options).estimate(buffer, sample_rate)
}

fn run_yin(
    buffer: &[f32],
    sample_rate: u32,
    options: &YinOptions,
    diff: &mut Vec<f32>,
    cmnd: &mut Vec<f32>,
) -> PitchEstimate {
    let sr = sample_rate as f32;
    let len = buffer.len();

    // --- Step 1: Lag search range from the frequency band ---
    let tau_min = ((sr / options.max_frequency).floor() as usize).max(2);
    let tau_max = ((sr / options.min_frequency).ceil() as usize).min(len.saturating_sub(2));
    if tau_max <= tau_min {
        return PitchEstimate::NONE;
    }

    // --- Step 2: Difference function ---
    // Lags below tau_min are evaluated too so the cumulative mean in step 3
    // has full support; only [tau_min, tau_max] is searched.
    diff.clear();
    diff.resize(tau_max + 1, 0.0);
    for tau in 1..=tau_max {
        let mut sum = 0.0;
        for i in 0..(len - tau) {
            let delta = buffer[i] - buffer[i + tau];
            sum += delta * delta;
        }
        diff[tau] = sum;
    }

    // --- Step 3: Cumulative mean normalized difference ---
    cmnd.clear();
    cmnd.resize(tau_max + 1, 1.0);
    let mut running_sum = 0.0;
    for tau in 1..=tau_max {
        running_sum += diff[tau];
        cmnd[tau] = if running_sum == 0.0 {
            1.0
        } else {
            diff[tau] * tau as f32 / running_sum
        };
    }

    // --- Step 4: First dip under the threshold, walked to its minimum ---
    let mut tau_estimate = None;
    let mut tau = tau_min;
    while tau <= tau_max {
        if cmnd[tau] < options.threshold {
            while tau < tau_max && cmnd[tau + 1] < cmnd[tau] {
                tau += 1;
            }
            tau_estimate = Some(tau);
            break;
        }
        tau += 1;
    }

    // --- Step 5: Fallback to the global minimum (lower confidence) ---
    let tau_estimate = match tau_estimate.or_else(|| global_minimum(cmnd, tau_min, tau_max)) {
        Some(tau) => tau,
        None => return PitchEstimate::NONE,
    };

    // --- Step 6 & 7: Refine, then score ---
    let better_tau = parabolic_interpolation(cmnd, tau_estimate);
    let probability = (1.0 - cmnd[tau_estimate]).clamp(0.0, 1.0);
    if better_tau <= 0.0 {
        return PitchEstimate::NONE;
    }
    let frequency = sr / better_tau;

    // --- Step 8: Keep only finite, in-band candidates ---
    if !frequency.is_finite() {
        return PitchEstimate::NONE;
    }
    if frequency < options.min_frequency || frequency > options.max_frequency {
        return PitchEstimate {
            frequency: None,
            probability,
        };
    }

    PitchEstimate {
        frequency: Some(frequency),
        probability,
    }
}

fn global_minimum(cmnd: &[f32], tau_min: usize, tau_max: usize) -> Option<usize> {
    let mut min_val = f32::INFINITY;
    let mut min_tau = None;
    for (tau, &value) in cmnd.iter().enumerate().take(tau_max + 1).skip(tau_min) {
        if value < min_val {
            min_val = value;
            min_tau = Some(tau);
        }
    }
    min_tau
}

/// Vertex of the parabola through `values[index - 1..=index + 1]`.
///
/// Falls back to `index` at either edge or when the three points are
/// collinear.
fn parabolic_interpolation(values: &[f32], index: usize) -> f32 {
    if index == 0 || index + 1 >= values.len() {
        return index as f32;
    }

    let s0 = values[index - 1];
    let s1 = values[index];
    let s2 = values[index + 1];

    let denom = 2.0 * s1 - s2 - s0;
    if denom == 0.0 {
        return index as f32;
    }
    index as f32 + (s2 - s0) / (2.0 * denom)
}

/// Root-mean-square level of a frame; 0 for an empty frame.
pub fn compute_rms(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    (frame.iter().map(|&s| s * s).sum::<f32>() / frame.len() as f32).sqrt()
}

/// Median of a set of values; an even count averages the middle pair.
pub fn median(values: &[f32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f32::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    }
}
