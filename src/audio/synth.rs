//! Sine synthesis with shaped tone slopes.
//! Tones are shaped with a rising and falling amplitude ramp so consecutive
//! tones don't click, and the sine phase is carried from tone to tone so
//! concatenation is seamless.

use std::f64::consts::PI;

use crate::audio::sink::AudioSink;
use crate::error::Result;
use crate::tone_queue::{SlopeMode, Tone, QUANTUM_US};

/// Default length of a single slope, in microseconds.
pub const SLOPE_LENGTH_US: i64 = 5_000;

/// Height of the PCM sample space; percent volume maps onto this.
pub const VOLUME_RANGE: i32 = 1 << 15;

/// Absolute sample amplitude for a percent volume.
pub fn volume_abs(percent: i32) -> f32 {
    (VOLUME_RANGE - 1) as f32 * percent as f32 / 100.0
}

/// Shape of the amplitude ramp at tone edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlopeShape {
    Linear,
    RaisedCosine,
    Sine,
    /// Full amplitude from the first sample; effectively no slope.
    Rectangular,
}

/// Amplitude table for one slope, precomputed for a (shape, length,
/// sample rate) triple. Rising slopes read it forward, falling slopes read
/// it backward.
#[derive(Debug, Clone)]
pub struct ToneSlope {
    pub shape: SlopeShape,
    pub length_us: i64,
    amplitudes: Vec<f32>,
}

impl ToneSlope {
    pub fn new(shape: SlopeShape, length_us: i64, sample_rate: u32) -> Self {
        let n = (length_us * sample_rate as i64 / 1_000_000) as usize;

        let amplitudes = (0..n)
            .map(|i| {
                if n < 2 {
                    return 1.0;
                }
                let x = i as f64 / (n - 1) as f64;
                match shape {
                    SlopeShape::Linear => x as f32,
                    SlopeShape::RaisedCosine => ((1.0 - (PI * x).cos()) / 2.0) as f32,
                    SlopeShape::Sine => (PI / 2.0 * x).sin() as f32,
                    SlopeShape::Rectangular => 1.0,
                }
            })
            .collect();

        Self {
            shape,
            length_us,
            amplitudes,
        }
    }

    pub fn len(&self) -> usize {
        self.amplitudes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.amplitudes.is_empty()
    }
}

/// Generates PCM samples for dequeued tones and pushes them to the sink in
/// complete buffers.
pub struct Synth {
    sample_rate: u32,
    /// Sine phase in radians, persistent across tones.
    phase: f64,
    buffer: Vec<i16>,
    filled: usize,
    /// Set while a forever tone is being repeated, so continuation chunks
    /// skip the rising slope.
    continuing_forever: bool,
}

impl Synth {
    pub fn new(sample_rate: u32, buffer_n_samples: usize) -> Self {
        Self {
            sample_rate,
            phase: 0.0,
            buffer: vec![0; buffer_n_samples],
            filled: 0,
            continuing_forever: false,
        }
    }

    pub fn buffer_n_samples(&self) -> usize {
        self.buffer.len()
    }

    /// Synthesize one tone into the sink.
    ///
    /// A forever tone produces a single quantum of samples per call; the
    /// caller keeps dequeuing it. Frequency 0 produces silence.
    pub fn write_tone(
        &mut self,
        tone: &Tone,
        slope: &ToneSlope,
        volume_abs: f32,
        sink: &mut dyn AudioSink,
    ) -> Result<()> {
        let forever = tone.is_forever();
        let duration_us = if forever { QUANTUM_US } else { tone.duration_us };
        let n_samples = (duration_us * self.sample_rate as i64 / 1_000_000) as usize;

        let rising = !self.continuing_forever
            && matches!(tone.slope_mode, SlopeMode::Standard | SlopeMode::RisingOnly);
        // A forever tone keeps sounding, so its chunks never fall.
        let falling = !forever
            && matches!(tone.slope_mode, SlopeMode::Standard | SlopeMode::FallingOnly);

        let n_slope = slope.len();
        let falling_from = n_samples.saturating_sub(n_slope);
        let step = 2.0 * PI * tone.frequency as f64 / self.sample_rate as f64;

        for k in 0..n_samples {
            let amplitude = if rising && k < n_slope {
                slope.amplitudes[k]
            } else if falling && k >= falling_from {
                slope.amplitudes[n_samples - 1 - k]
            } else {
                1.0
            };

            let sample = if tone.frequency > 0 {
                self.phase += step;
                (volume_abs * amplitude * self.phase.sin() as f32) as i16
            } else {
                0
            };

            self.push_sample(sample, sink)?;
        }

        self.phase %= 2.0 * PI;
        self.continuing_forever = forever;

        Ok(())
    }

    fn push_sample(&mut self, sample: i16, sink: &mut dyn AudioSink) -> Result<()> {
        self.buffer[self.filled] = sample;
        self.filled += 1;

        if self.filled == self.buffer.len() {
            sink.write(&self.buffer)?;
            self.filled = 0;
        }

        Ok(())
    }

    /// Pad the partial buffer with silence and write it out.
    /// Called when the tone queue runs dry, so the sink always receives
    /// complete buffers.
    pub fn flush(&mut self, sink: &mut dyn AudioSink) -> Result<()> {
        if self.filled == 0 {
            return Ok(());
        }

        for sample in &mut self.buffer[self.filled..] {
            *sample = 0;
        }
        sink.write(&self.buffer)?;
        self.filled = 0;

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tone_queue::FOREVER_US;

    /// Sink that keeps every sample for inspection.
    struct CaptureSink {
        samples: Vec<i16>,
    }

    impl CaptureSink {
        fn new() -> Self {
            Self { samples: Vec::new() }
        }
    }

    impl AudioSink for CaptureSink {
        fn open(&mut self) -> crate::error::Result<()> {
            Ok(())
        }

        fn write(&mut self, samples: &[i16]) -> crate::error::Result<usize> {
            self.samples.extend_from_slice(samples);
            Ok(samples.len())
        }

        fn close(&mut self) {}

        fn sample_rate(&self) -> u32 {
            44_100
        }
    }

    #[test]
    fn test_slope_table_shapes() {
        let rate = 44_100;

        let linear = ToneSlope::new(SlopeShape::Linear, 5000, rate);
        assert_eq!(linear.len(), 220);
        assert_eq!(linear.amplitudes[0], 0.0);
        assert_eq!(linear.amplitudes[219], 1.0);

        let cosine = ToneSlope::new(SlopeShape::RaisedCosine, 5000, rate);
        assert_eq!(cosine.amplitudes[0], 0.0);
        assert!((cosine.amplitudes[219] - 1.0).abs() < 1e-6);
        // Halfway up at the midpoint
        assert!((cosine.amplitudes[110] - 0.5).abs() < 0.02);

        let sine = ToneSlope::new(SlopeShape::Sine, 5000, rate);
        assert_eq!(sine.amplitudes[0], 0.0);
        assert!((sine.amplitudes[219] - 1.0).abs() < 1e-6);

        let rect = ToneSlope::new(SlopeShape::Rectangular, 5000, rate);
        assert!(rect.amplitudes.iter().all(|&a| a == 1.0));

        // Monotonic rise for every real shape
        for slope in [&linear, &cosine, &sine] {
            assert!(slope.amplitudes.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn test_sample_counts_and_padding() {
        let mut synth = Synth::new(44_100, 256);
        let mut sink = CaptureSink::new();
        let slope = ToneSlope::new(SlopeShape::RaisedCosine, 5000, 44_100);

        // 10 ms at 44.1 kHz = 441 samples: one full buffer plus a partial.
        let tone = Tone::new(10_000, 800, SlopeMode::Standard);
        synth.write_tone(&tone, &slope, volume_abs(70), &mut sink).unwrap();
        assert_eq!(sink.samples.len(), 256);

        synth.flush(&mut sink).unwrap();
        assert_eq!(sink.samples.len(), 512);
        // The padding after sample 441 is silence.
        assert!(sink.samples[441..].iter().all(|&s| s == 0));
    }

    #[test]
    fn test_silence_is_zero() {
        let mut synth = Synth::new(44_100, 64);
        let mut sink = CaptureSink::new();
        let slope = ToneSlope::new(SlopeShape::RaisedCosine, 5000, 44_100);

        synth
            .write_tone(&Tone::silence(20_000), &slope, volume_abs(70), &mut sink)
            .unwrap();
        synth.flush(&mut sink).unwrap();
        assert!(sink.samples.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_phase_continuity_across_tones() {
        let mut synth = Synth::new(44_100, 64);
        let mut sink = CaptureSink::new();
        let slope = ToneSlope::new(SlopeShape::Rectangular, 0, 44_100);

        // Two unshaped tones back to back; any phase reset would show up as
        // a jump bigger than the steepest slope of the sine itself.
        let tone = Tone::new(10_000, 800, SlopeMode::NoSlopes);
        for _ in 0..2 {
            synth.write_tone(&tone, &slope, volume_abs(70), &mut sink).unwrap();
        }
        synth.flush(&mut sink).unwrap();

        let max_step = volume_abs(70) as f64 * 2.0 * PI * 800.0 / 44_100.0 * 1.05;
        for pair in sink.samples[..882].windows(2) {
            let step = (pair[1] as f64 - pair[0] as f64).abs();
            assert!(step <= max_step, "phase discontinuity: step {step}");
        }
    }

    #[test]
    fn test_standard_tone_starts_and_ends_quiet() {
        let mut synth = Synth::new(44_100, 32);
        let mut sink = CaptureSink::new();
        let slope = ToneSlope::new(SlopeShape::RaisedCosine, 5000, 44_100);

        let tone = Tone::new(20_000, 800, SlopeMode::Standard);
        synth.write_tone(&tone, &slope, volume_abs(100), &mut sink).unwrap();
        synth.flush(&mut sink).unwrap();

        let loud = volume_abs(100) as i32 / 2;
        // First and last few samples sit inside the ramps.
        assert!(sink.samples[..16].iter().all(|&s| (s as i32).abs() < loud));
        assert!(sink.samples[866..882].iter().all(|&s| (s as i32).abs() < loud));
        // The middle reaches full swing somewhere.
        assert!(sink.samples[300..500].iter().any(|&s| (s as i32).abs() > loud));
    }

    #[test]
    fn test_forever_tone_emits_quanta_without_restarting_slope() {
        let mut synth = Synth::new(48_000, 16);
        let mut sink = CaptureSink::new();
        let slope = ToneSlope::new(SlopeShape::Linear, 1_000, 48_000);

        // One quantum at 48 kHz is 4 samples, emitted per dequeue.
        let n_quantum = (QUANTUM_US * 48_000 / 1_000_000) as usize;
        assert_eq!(n_quantum, 4);

        let forever = Tone::new(FOREVER_US, 500, SlopeMode::RisingOnly);
        for _ in 0..8 {
            synth.write_tone(&forever, &slope, volume_abs(70), &mut sink).unwrap();
        }
        synth.flush(&mut sink).unwrap();
        assert_eq!(sink.samples.len(), 8 * n_quantum);

        // The rising ramp spans the first chunks only; a continuation chunk
        // well past the slope runs at full amplitude, not back at zero.
        let peak = sink
            .samples
            .iter()
            .skip(6 * n_quantum)
            .map(|&s| (s as i32).abs())
            .max()
            .unwrap_or(0);
        assert!(peak > volume_abs(70) as i32 / 2);
    }
}
