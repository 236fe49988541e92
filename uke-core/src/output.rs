//! # Audio Output Module
//!
//! A cpal playback stream that doubles as the schedulers' audio clock.
//! The clock is the number of frames the device has pulled, so it advances
//! in lock-step with what is actually heard; sounds handed over with a
//! clock time are started on exactly that frame by the [`Renderer`].

use crate::engine::{AudioEngine, Sound};
use crate::error::{DeviceError, DeviceResult};
use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type};
use cpal::Sample;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};
use log::{error, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Gain treated as silence by the exponential envelopes.
const GAIN_FLOOR: f32 = 0.0001;

/// How many sounds may wait between scheduler and audio callback.
const SOUND_QUEUE_CAPACITY: usize = 1024;

/// Cheap, cloneable handle onto a running output stream.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    sample_rate: u32,
    frames_rendered: Arc<AtomicU64>,
    sounds: Sender<(f64, Sound)>,
}

impl EngineHandle {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl AudioEngine for EngineHandle {
    fn current_time(&self) -> f64 {
        self.frames_rendered.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    fn schedule(&self, when: f64, sound: Sound) {
        let when = when.max(self.current_time());
        if self.sounds.try_send((when, sound)).is_err() {
            warn!("[OUTPUT] Sound queue full, dropping {:?} at {:.3}s", sound, when);
        }
    }
}

/// The open playback stream. Dropping it stops all sound.
pub struct CpalOutput {
    _stream: cpal::Stream,
    engine: EngineHandle,
}

impl CpalOutput {
    /// Opens the default output device with its default configuration.
    pub fn open() -> DeviceResult<Self> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(DeviceError::NoOutputDevice)?;
        info!("[OUTPUT] Using audio output device: {}", device.name()?);

        let config = device.default_output_config()?;
        let sample_rate = config.sample_rate().0;
        let (sounds_tx, sounds_rx) = crossbeam_channel::bounded(SOUND_QUEUE_CAPACITY);
        let frames_rendered = Arc::new(AtomicU64::new(0));
        let renderer = Renderer::new(sample_rate);
        let counter = Arc::clone(&frames_rendered);

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => Self::run::<f32>(&device, &config.into(), renderer, sounds_rx, counter)?,
            cpal::SampleFormat::I16 => Self::run::<i16>(&device, &config.into(), renderer, sounds_rx, counter)?,
            cpal::SampleFormat::U16 => Self::run::<u16>(&device, &config.into(), renderer, sounds_rx, counter)?,
            _ => return Err(DeviceError::NoSupportedConfig),
        };

        stream.play()?;
        info!("[OUTPUT] Output stream running at {} Hz", sample_rate);

        Ok(Self {
            _stream: stream,
            engine: EngineHandle {
                sample_rate,
                frames_rendered,
                sounds: sounds_tx,
            },
        })
    }

    pub fn engine(&self) -> EngineHandle {
        self.engine.clone()
    }

    fn run<T>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        mut renderer: Renderer,
        sounds: Receiver<(f64, Sound)>,
        frames_rendered: Arc<AtomicU64>,
    ) -> Result<cpal::Stream, cpal::BuildStreamError>
    where
        T: Sample + cpal::SizedSample + cpal::FromSample<f32>,
    {
        let channels = config.channels.max(1) as usize;

        device.build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                while let Ok((when, sound)) = sounds.try_recv() {
                    renderer.enqueue(when, sound);
                }

                for frame in data.chunks_mut(channels) {
                    let sample = renderer.next_sample();
                    // Limiting and NaN protection
                    let sample = if sample.is_finite() { sample.clamp(-0.95, 0.95) } else { 0.0 };
                    for out in frame.iter_mut() {
                        *out = T::from_sample(sample);
                    }
                }

                frames_rendered.store(renderer.frame(), Ordering::Release);
            },
            |err| error!("[OUTPUT] Audio stream error: {}", err),
            None,
        )
    }
}

/// Mixes scheduled clicks and tones, one mono sample at a time.
pub struct Renderer {
    sample_rate: f32,
    frame: u64,
    pending: Vec<(u64, Sound)>,
    voices: Vec<Voice>,
}

impl Renderer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate as f32,
            frame: 0,
            pending: Vec::with_capacity(64),
            voices: Vec::with_capacity(16),
        }
    }

    /// Frames rendered so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Queues `sound` to start at clock time `when` (seconds).
    pub fn enqueue(&mut self, when: f64, sound: Sound) {
        let start = (when.max(0.0) * self.sample_rate as f64).round() as u64;
        self.pending.push((start.max(self.frame), sound));
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    pub fn next_sample(&mut self) -> f32 {
        let mut i = 0;
        while i < self.pending.len() {
            if self.pending[i].0 <= self.frame {
                let (_, sound) = self.pending.swap_remove(i);
                self.voices.push(Voice::new(sound, self.sample_rate));
            } else {
                i += 1;
            }
        }

        let out = self.voices.iter_mut().map(Voice::next_sample).sum();
        self.voices.retain(|v| !v.finished());
        self.frame += 1;
        out
    }

    pub fn render(&mut self, out: &mut [f32]) {
        for sample in out.iter_mut() {
            *sample = self.next_sample();
        }
    }
}

enum Timbre {
    /// Tapered noise through a bandpass and a highpass.
    Wood {
        bandpass: Option<DirectForm2Transposed<f32>>,
        highpass: Option<DirectForm2Transposed<f32>>,
    },
    /// Triangle oscillator through a gentle lowpass.
    Triangle {
        phase: f32,
        phase_inc: f32,
        lowpass: Option<DirectForm2Transposed<f32>>,
    },
}

struct Voice {
    timbre: Timbre,
    sample_rate: f32,
    age: u32,
    length: u32,
    attack: f32,
    release_end: f32,
    peak: f32,
}

impl Voice {
    fn new(sound: Sound, sample_rate: f32) -> Self {
        let filter = |kind, cutoff: f32, q: f32| {
            Coefficients::<f32>::from_params(kind, sample_rate.hz(), cutoff.hz(), q)
                .ok()
                .map(DirectForm2Transposed::<f32>::new)
        };

        match sound {
            Sound::Click { accent, volume } => Voice {
                timbre: Timbre::Wood {
                    bandpass: if accent {
                        filter(Type::BandPass, 950.0, 1.4)
                    } else {
                        filter(Type::BandPass, 750.0, 1.2)
                    },
                    highpass: filter(Type::HighPass, 250.0, 0.707),
                },
                sample_rate,
                age: 0,
                length: (0.06 * sample_rate) as u32,
                attack: 0.002,
                release_end: 0.04,
                peak: (if accent { 1.0 } else { 0.8 }) * volume.clamp(0.0, 1.0),
            },
            Sound::Tone {
                frequency,
                duration,
                volume,
            } => {
                let duration = duration.max(0.02);
                Voice {
                    timbre: Timbre::Triangle {
                        phase: 0.0,
                        phase_inc: frequency / sample_rate,
                        lowpass: filter(Type::LowPass, 1400.0, 0.7),
                    },
                    sample_rate,
                    age: 0,
                    length: ((duration + 0.01) * sample_rate) as u32,
                    attack: 0.005,
                    release_end: duration,
                    peak: volume.clamp(0.0, 1.0),
                }
            }
        }
    }

    fn next_sample(&mut self) -> f32 {
        let t = self.age as f32 / self.sample_rate;
        let raw = match &mut self.timbre {
            Timbre::Wood { bandpass, highpass } => {
                let taper = if t < 0.045 { (-10.0 * t / 0.045).exp() } else { 0.0 };
                let mut s = (fastrand::f32() * 2.0 - 1.0) * taper;
                if let Some(bp) = bandpass {
                    s = bp.run(s);
                }
                if let Some(hp) = highpass {
                    s = hp.run(s);
                }
                s
            }
            Timbre::Triangle { phase, phase_inc, lowpass } => {
                let tri = 4.0 * (*phase - 0.5).abs() - 1.0;
                *phase = (*phase + *phase_inc).fract();
                match lowpass {
                    Some(lp) => lp.run(tri),
                    None => tri,
                }
            }
        };
        self.age += 1;
        raw * envelope(t, self.attack, self.release_end, self.peak)
    }

    fn finished(&self) -> bool {
        self.age >= self.length
    }
}

/// Exponential rise from the floor to `peak`, then exponential fall back to
/// the floor at `release_end`.
fn envelope(t: f32, attack: f32, release_end: f32, peak: f32) -> f32 {
    if peak <= GAIN_FLOOR {
        return 0.0;
    }
    if t < attack {
        GAIN_FLOOR * (peak / GAIN_FLOOR).powf(t / attack)
    } else if t < release_end {
        peak * (GAIN_FLOOR / peak).powf((t - attack) / (release_end - attack))
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 48_000;

    #[test]
    fn test_sound_starts_on_its_frame() {
        let mut renderer = Renderer::new(SR);
        renderer.enqueue(0.01, Sound::Tone { frequency: 440.0, duration: 0.1, volume: 0.8 });

        let mut before = vec![0.0; 480];
        renderer.render(&mut before);
        assert!(before.iter().all(|&s| s == 0.0));
        assert_eq!(renderer.active_voices(), 0);

        let mut after = vec![0.0; 2400];
        renderer.render(&mut after);
        assert_eq!(renderer.active_voices(), 1);
        assert!(after.iter().any(|&s| s.abs() > 0.05));
    }

    #[test]
    fn test_click_decays_and_frees_its_voice() {
        let mut renderer = Renderer::new(SR);
        renderer.enqueue(0.0, Sound::Click { accent: true, volume: 1.0 });

        let mut buf = vec![0.0; (0.06 * SR as f32) as usize + 10];
        renderer.render(&mut buf);

        assert!(buf.iter().any(|&s| s.abs() > 0.01));
        assert!(buf.iter().all(|s| s.is_finite()));
        assert_eq!(renderer.active_voices(), 0);
        assert_eq!(renderer.next_sample(), 0.0);
    }

    #[test]
    fn test_late_sound_plays_immediately() {
        let mut renderer = Renderer::new(SR);
        let mut buf = vec![0.0; 4800];
        renderer.render(&mut buf);

        renderer.enqueue(0.05, Sound::Tone { frequency: 330.0, duration: 0.05, volume: 0.5 });
        renderer.next_sample();
        assert_eq!(renderer.active_voices(), 1);
    }

    #[test]
    fn test_silent_volume_renders_nothing() {
        let mut renderer = Renderer::new(SR);
        renderer.enqueue(0.0, Sound::Click { accent: false, volume: 0.0 });
        let mut buf = vec![1.0; 512];
        renderer.render(&mut buf);
        assert!(buf.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_envelope_shape() {
        assert!((envelope(0.0, 0.005, 0.1, 0.8) - GAIN_FLOOR).abs() < 1e-6);
        assert!((envelope(0.005, 0.005, 0.1, 0.8) - 0.8).abs() < 1e-4);
        assert!(envelope(0.05, 0.005, 0.1, 0.8) < 0.8);
        assert_eq!(envelope(0.2, 0.005, 0.1, 0.8), 0.0);
    }
}
