//! # Audio Capture Module
//!
//! This module handles real-time microphone capture using CPAL (Cross-Platform
//! Audio Library). The capture callback plays the role of a small audio graph:
//! source → highpass → lowpass → analysis tap, and ships fixed-size frames to
//! the pitch tracker over a channel.
//!
//! ## Features
//! - Automatic input device and format selection
//! - Rumble and hiss removal with Butterworth biquads
//! - Multi-channel devices are mixed down to mono
//! - Non-blocking hand-off: frames are dropped, never queued, when the
//!   consumer falls behind

use crate::error::{DeviceError, DeviceResult};
use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type, Q_BUTTERWORTH_F32};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SupportedStreamConfigRange;
use crossbeam_channel::Sender;
use log::{debug, error, info, warn};

/// Sample rate requested from the device when it offers a choice.
pub const PREFERRED_SAMPLE_RATE: u32 = 44_100;

/// What the tracker asks of a capture session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureConfig {
    /// Samples per analysis frame.
    pub frame_size: usize,
    /// Highpass corner removing handling noise and rumble.
    pub highpass_hz: f32,
    /// Lowpass corner removing hiss above the fundamentals of interest.
    pub lowpass_hz: f32,
}

/// An open capture stream. Dropping it releases the device.
pub trait CaptureSession {
    fn sample_rate(&self) -> u32;
}

/// Something that can open the microphone.
pub trait CaptureBackend {
    /// Opens a session that pushes filtered frames of exactly
    /// `config.frame_size` samples into `frames`.
    fn open(&self, config: &CaptureConfig, frames: Sender<Vec<f32>>) -> DeviceResult<Box<dyn CaptureSession>>;
}

/// The default capture backend: the host's default input device via cpal.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalCapture;

struct CpalSession {
    stream: cpal::Stream,
    sample_rate: u32,
}

impl CaptureSession for CpalSession {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for CpalSession {
    fn drop(&mut self) {
        // Properly stop the stream before dropping it
        if let Err(e) = self.stream.pause() {
            warn!("[CAPTURE] Error pausing stream: {}", e);
        }
        info!("[CAPTURE] Input stream released");
    }
}

impl CaptureBackend for CpalCapture {
    /// Starts audio capture from the default input device.
    ///
    /// This function:
    /// 1. Selects the default audio input device
    /// 2. Picks an f32 configuration close to 44.1 kHz, preferring mono
    /// 3. Builds the filter chain for the negotiated sample rate
    /// 4. Streams filtered frames to the tracker
    fn open(&self, config: &CaptureConfig, frames: Sender<Vec<f32>>) -> DeviceResult<Box<dyn CaptureSession>> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or(DeviceError::NoInputDevice)?;

        info!("[CAPTURE] Using audio input device: {}", device.name()?);

        let configs = device.supported_input_configs()?.collect::<Vec<_>>();
        let supported_config =
            find_supported_config(configs, PREFERRED_SAMPLE_RATE).ok_or(DeviceError::NoSupportedConfig)?;

        let rate = PREFERRED_SAMPLE_RATE.clamp(
            supported_config.min_sample_rate().0,
            supported_config.max_sample_rate().0,
        );
        let supported_config = supported_config.with_sample_rate(cpal::SampleRate(rate));
        let sample_rate = supported_config.sample_rate().0;
        let stream_config: cpal::StreamConfig = supported_config.into();
        let channels = stream_config.channels.max(1) as usize;

        info!("[CAPTURE] Selected sample rate: {} Hz, {} channel(s)", sample_rate, channels);

        let mut filters = FilterChain::new(sample_rate, config.highpass_hz, config.lowpass_hz)?;
        let mut assembler = FrameAssembler::new(config.frame_size);
        let mut dropped: u64 = 0;

        let stream = device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for frame in data.chunks(channels) {
                    let mono = frame.iter().sum::<f32>() / frame.len() as f32;
                    assembler.push(filters.process(mono), |full| {
                        // Send the frame, dropping it if the tracker lags.
                        if frames.try_send(full).is_err() {
                            dropped += 1;
                            if dropped.is_power_of_two() {
                                debug!("[CAPTURE] Dropped {} frames so far", dropped);
                            }
                        }
                    });
                }
            },
            |err| error!("[CAPTURE] An error occurred on the audio stream: {}", err),
            None,
        )?;

        stream.play()?;

        Ok(Box::new(CpalSession { stream, sample_rate }))
    }
}

/// Finds the best supported input configuration for the target sample rate.
///
/// Only 32-bit float formats qualify. Among those, fewer channels win, then
/// the range closest to `target_rate`.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
        .min_by_key(|c| {
            let min = c.min_sample_rate().0;
            let max = c.max_sample_rate().0;
            let rate_distance = if (min..=max).contains(&target_rate) {
                0
            } else {
                min.abs_diff(target_rate).min(max.abs_diff(target_rate))
            };
            (c.channels(), rate_distance)
        })
}

/// Highpass followed by lowpass, both second-order Butterworth.
#[derive(Debug)]
pub struct FilterChain {
    highpass: DirectForm2Transposed<f32>,
    lowpass: DirectForm2Transposed<f32>,
}

impl FilterChain {
    pub fn new(sample_rate: u32, highpass_hz: f32, lowpass_hz: f32) -> DeviceResult<Self> {
        let design = |kind, cutoff_hz: f32| {
            Coefficients::<f32>::from_params(kind, (sample_rate as f32).hz(), cutoff_hz.hz(), Q_BUTTERWORTH_F32)
                .map_err(|_| DeviceError::InvalidFilter { cutoff_hz, sample_rate })
        };
        Ok(Self {
            highpass: DirectForm2Transposed::<f32>::new(design(Type::HighPass, highpass_hz)?),
            lowpass: DirectForm2Transposed::<f32>::new(design(Type::LowPass, lowpass_hz)?),
        })
    }

    pub fn process(&mut self, sample: f32) -> f32 {
        self.lowpass.run(self.highpass.run(sample))
    }
}

/// Cuts a continuous sample stream into consecutive fixed-size frames.
#[derive(Debug, Clone)]
pub struct FrameAssembler {
    frame_size: usize,
    buffer: Vec<f32>,
}

impl FrameAssembler {
    pub fn new(frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            buffer: Vec::with_capacity(frame_size),
        }
    }

    /// Appends one sample, handing over a full frame when one completes.
    pub fn push(&mut self, sample: f32, mut on_frame: impl FnMut(Vec<f32>)) {
        self.buffer.push(sample);
        if self.buffer.len() == self.frame_size {
            let full = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.frame_size));
            on_frame(full);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pitch::compute_rms;
    use std::f32::consts::PI;

    fn tone_rms_after_filtering(freq: f32) -> f32 {
        let sample_rate = 44_100;
        let mut chain = FilterChain::new(sample_rate, 80.0, 1200.0).unwrap();
        let filtered: Vec<f32> = (0..8192)
            .map(|i| chain.process((2.0 * PI * freq * i as f32 / sample_rate as f32).sin()))
            .collect();
        // Skip the transient.
        compute_rms(&filtered[4096..])
    }

    #[test]
    fn test_filter_chain_passes_ukulele_range() {
        let rms = tone_rms_after_filtering(392.0);
        assert!(rms > 0.6, "392 Hz attenuated to {rms}");
    }

    #[test]
    fn test_filter_chain_rejects_rumble_and_hiss() {
        let rumble = tone_rms_after_filtering(20.0);
        let hiss = tone_rms_after_filtering(8000.0);
        assert!(rumble < 0.1, "20 Hz passed at {rumble}");
        assert!(hiss < 0.05, "8 kHz passed at {hiss}");
    }

    #[test]
    fn test_filter_above_nyquist_is_rejected() {
        let err = FilterChain::new(8_000, 80.0, 6_000.0).unwrap_err();
        assert!(matches!(err, DeviceError::InvalidFilter { sample_rate: 8_000, .. }));
    }

    #[test]
    fn test_frame_assembler_emits_full_frames() {
        let mut assembler = FrameAssembler::new(4);
        let mut frames = Vec::new();
        for i in 0..10 {
            assembler.push(i as f32, |f| frames.push(f));
        }
        assert_eq!(frames, vec![vec![0.0, 1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0, 7.0]]);
    }
}
