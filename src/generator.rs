//! The generator: translates characters into tones, queues them, and runs
//! the consumer thread that turns queued tones into samples on the audio
//! sink.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, warn};
use parking_lot::Mutex;

use crate::audio::sink::AudioSink;
use crate::audio::synth::{self, SlopeShape, Synth, ToneSlope, SLOPE_LENGTH_US};
use crate::coding::morse;
use crate::error::{Error, Result};
use crate::key::KeyBridge;
use crate::timing::{
    SendParams, SendTimings, FREQUENCY_INITIAL, FREQUENCY_MAX, FREQUENCY_MIN, GAP_MAX, GAP_MIN,
    SPEED_MAX, SPEED_MIN, VOLUME_INITIAL, VOLUME_MAX, VOLUME_MIN, WEIGHTING_MAX, WEIGHTING_MIN,
};
use crate::tone_queue::{QueueState, SlopeMode, Tone, ToneQueue, QUANTUM_US};

struct SendState {
    params: SendParams,
    timings: SendTimings,
    in_sync: bool,
    frequency: i32,
    volume: i32,
}

/// State the consumer thread shares with the client-facing API.
struct Shared {
    send: Mutex<SendState>,
    /// Swapped wholesale on slope parameter changes; the consumer takes a
    /// cheap snapshot per tone.
    slope: Mutex<Arc<ToneSlope>>,
    key: Mutex<Option<KeyBridge>>,
    last_error: Mutex<Option<Error>>,
}

pub struct Generator {
    tq: Arc<ToneQueue>,
    shared: Arc<Shared>,
    sample_rate: u32,
    /// Moved into the consumer thread by `start`.
    sink: Option<Box<dyn AudioSink + Send>>,
    consumer: Option<JoinHandle<()>>,
}

impl Generator {
    /// A generator writing into `sink`. The sink stays closed until
    /// [`Generator::start`].
    pub fn new(sink: Box<dyn AudioSink + Send>) -> Self {
        let sample_rate = sink.sample_rate();
        let params = SendParams::default();

        Self {
            tq: Arc::new(ToneQueue::new()),
            shared: Arc::new(Shared {
                send: Mutex::new(SendState {
                    params,
                    timings: SendTimings::sync(&params),
                    in_sync: true,
                    frequency: FREQUENCY_INITIAL,
                    volume: VOLUME_INITIAL,
                }),
                slope: Mutex::new(Arc::new(ToneSlope::new(
                    SlopeShape::RaisedCosine,
                    SLOPE_LENGTH_US,
                    sample_rate,
                ))),
                key: Mutex::new(None),
                last_error: Mutex::new(None),
            }),
            sample_rate,
            sink: Some(sink),
            consumer: None,
        }
    }

    /// Open the audio sink and spawn the consumer thread.
    /// A stopped generator cannot be started again.
    pub fn start(&mut self) -> Result<()> {
        if self.consumer.is_some() {
            return Ok(());
        }

        let mut sink = self.sink.take().ok_or(Error::NotRunning)?;
        sink.open()?;

        let buffer_n_samples = (self.sample_rate as usize / 8)
            .clamp(sink.min_buffer_samples(), sink.max_buffer_samples());
        let synth = Synth::new(self.sample_rate, buffer_n_samples);

        let tq = self.tq.clone();
        let shared = self.shared.clone();
        let consumer = thread::Builder::new()
            .name("radio-morse-gen".into())
            .spawn(move || consumer_loop(tq, shared, sink, synth))
            .map_err(|e| Error::Sink(e.to_string()))?;

        self.consumer = Some(consumer);
        debug!("generator started at {} Hz, {buffer_n_samples} samples per buffer", self.sample_rate);

        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.consumer.is_some()
    }

    /// Drain the queue, stop the consumer thread and close the sink.
    pub fn stop(&mut self) -> Result<()> {
        let Some(consumer) = self.consumer.take() else {
            return Ok(());
        };

        // A pending forever tone never drains on its own; a short silence
        // ends it. Shutdown lets the consumer hand out the queued tones and
        // exit once the queue is empty, so the join doubles as the drain.
        if !self.tq.is_empty() {
            let _ = self.tq.enqueue(Tone::silence(QUANTUM_US));
        }
        self.tq.shutdown();
        consumer
            .join()
            .map_err(|_| Error::Sink("consumer thread panicked".into()))?;

        debug!("generator stopped");
        Ok(())
    }

    /// The first sink error the consumer thread ran into, if any.
    pub fn last_error(&self) -> Option<Error> {
        self.shared.last_error.lock().clone()
    }

    pub fn tone_queue(&self) -> &Arc<ToneQueue> {
        &self.tq
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Observe keying edges on the consumer thread, e.g. to drive a
    /// receiver from this generator.
    pub fn set_key_bridge(&self, bridge: KeyBridge) {
        *self.shared.key.lock() = Some(bridge);
    }

    pub fn clear_key_bridge(&self) {
        *self.shared.key.lock() = None;
    }

    // == Parameters ==
    // All range-checked; they take effect from the next enqueue.

    pub fn set_speed(&self, wpm: i32) -> Result<()> {
        if !(SPEED_MIN..=SPEED_MAX).contains(&wpm) {
            return Err(Error::InvalidParameter("speed"));
        }
        let mut send = self.shared.send.lock();
        if send.params.speed != wpm {
            send.params.speed = wpm;
            send.in_sync = false;
        }
        Ok(())
    }

    pub fn speed(&self) -> i32 {
        self.shared.send.lock().params.speed
    }

    pub fn set_gap(&self, gap: i32) -> Result<()> {
        if !(GAP_MIN..=GAP_MAX).contains(&gap) {
            return Err(Error::InvalidParameter("gap"));
        }
        let mut send = self.shared.send.lock();
        if send.params.gap != gap {
            send.params.gap = gap;
            send.in_sync = false;
        }
        Ok(())
    }

    pub fn gap(&self) -> i32 {
        self.shared.send.lock().params.gap
    }

    pub fn set_weighting(&self, weighting: i32) -> Result<()> {
        if !(WEIGHTING_MIN..=WEIGHTING_MAX).contains(&weighting) {
            return Err(Error::InvalidParameter("weighting"));
        }
        let mut send = self.shared.send.lock();
        if send.params.weighting != weighting {
            send.params.weighting = weighting;
            send.in_sync = false;
        }
        Ok(())
    }

    pub fn weighting(&self) -> i32 {
        self.shared.send.lock().params.weighting
    }

    pub fn set_frequency(&self, frequency: i32) -> Result<()> {
        if !(FREQUENCY_MIN..=FREQUENCY_MAX).contains(&frequency) {
            return Err(Error::InvalidParameter("frequency"));
        }
        self.shared.send.lock().frequency = frequency;
        Ok(())
    }

    pub fn frequency(&self) -> i32 {
        self.shared.send.lock().frequency
    }

    pub fn set_volume(&self, volume: i32) -> Result<()> {
        if !(VOLUME_MIN..=VOLUME_MAX).contains(&volume) {
            return Err(Error::InvalidParameter("volume"));
        }
        self.shared.send.lock().volume = volume;
        Ok(())
    }

    pub fn volume(&self) -> i32 {
        self.shared.send.lock().volume
    }

    /// Change the slope shape and length used for all tones from now on.
    pub fn set_slope(&self, shape: SlopeShape, length_us: i64) -> Result<()> {
        if length_us < 0 {
            return Err(Error::InvalidParameter("slope_length"));
        }
        *self.shared.slope.lock() = Arc::new(ToneSlope::new(shape, length_us, self.sample_rate));
        Ok(())
    }

    // == Enqueueing ==

    /// Queue one character: a mark and an inter-element gap per element,
    /// with the trailing gap stretched to an inter-character gap. A space
    /// queues an inter-word gap.
    pub fn enqueue_character(&self, c: char) -> Result<()> {
        if c == ' ' {
            let (timings, _) = self.synced_send();
            return self
                .tq
                .enqueue(Tone::silence(timings.eoe_delay + timings.eow_delay));
        }

        let representation = morse::character_to_representation(c).ok_or(Error::InvalidChar(c))?;
        self.enqueue_elements(representation, false)
    }

    /// Queue a whole string. Spaces separate words; the end of the string
    /// also counts as a word boundary, so a sent word is always followed by
    /// a full word gap.
    pub fn enqueue_string(&self, s: &str) -> Result<()> {
        if !morse::string_is_valid(s) {
            let invalid = s
                .chars()
                .find(|&c| c != ' ' && !morse::character_is_valid(c))
                .unwrap_or(' ');
            return Err(Error::InvalidChar(invalid));
        }

        let chars: Vec<char> = s.chars().collect();
        for (i, &c) in chars.iter().enumerate() {
            if c == ' ' {
                // The preceding character already queued the word gap; only
                // leading or repeated spaces stretch the silence further.
                if i == 0 || chars[i - 1] == ' ' {
                    let (timings, _) = self.synced_send();
                    self.tq
                        .enqueue(Tone::silence(timings.eoe_delay + timings.eow_delay))?;
                }
                continue;
            }

            let rep = morse::character_to_representation(c).ok_or(Error::InvalidChar(c))?;
            let word_end = i + 1 == chars.len() || chars[i + 1] == ' ';
            self.enqueue_elements(rep, word_end)?;
        }

        Ok(())
    }

    /// Queue a raw representation instead of looking one up, ending with an
    /// inter-character gap.
    pub fn enqueue_representation(&self, representation: &str) -> Result<()> {
        if !morse::representation_is_valid(representation) {
            return Err(Error::InvalidParameter("representation"));
        }
        self.enqueue_elements(representation, false)
    }

    fn enqueue_elements(&self, representation: &str, word_end: bool) -> Result<()> {
        let (timings, frequency) = self.synced_send();

        let last = representation.len() - 1;
        for (i, element) in representation.bytes().enumerate() {
            let duration = match element {
                b'.' => timings.dot_length,
                _ => timings.dash_length,
            };
            self.tq
                .enqueue(Tone::new(duration, frequency, SlopeMode::Standard))?;

            let gap = if i < last {
                timings.eoe_delay
            } else if word_end {
                timings.eoe_delay + timings.eow_delay
            } else {
                timings.eoc_delay
            };
            self.tq.enqueue(Tone::silence(gap))?;
        }

        Ok(())
    }

    /// Current send timings and frequency, resynced if a setter dirtied them.
    fn synced_send(&self) -> (SendTimings, i32) {
        let mut send = self.shared.send.lock();
        if !send.in_sync {
            send.timings = SendTimings::sync(&send.params);
            send.in_sync = true;
        }
        (send.timings, send.frequency)
    }
}

impl Drop for Generator {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn consumer_loop(
    tq: Arc<ToneQueue>,
    shared: Arc<Shared>,
    mut sink: Box<dyn AudioSink + Send>,
    mut synth: Synth,
) {
    while let Some((tone, queue_state)) = tq.dequeue() {
        let audible = tone.frequency > 0;
        if audible {
            if let Some(bridge) = shared.key.lock().as_mut() {
                bridge.set(std::time::Instant::now(), true);
            }
        }

        let slope = shared.slope.lock().clone();
        let volume = shared.send.lock().volume;
        let result = synth.write_tone(&tone, &slope, synth::volume_abs(volume), sink.as_mut());

        if audible {
            if let Some(bridge) = shared.key.lock().as_mut() {
                bridge.set(std::time::Instant::now(), false);
            }
        }

        if let Err(e) = result {
            warn!("audio sink failed: {e}");
            shared.last_error.lock().get_or_insert(e);
            break;
        }

        // The queue ran dry: push the partial buffer out as-is so the sink
        // never waits on a fragment.
        if queue_state == QueueState::Idle {
            if let Err(e) = synth.flush(sink.as_mut()) {
                warn!("audio sink failed: {e}");
                shared.last_error.lock().get_or_insert(e);
                break;
            }
        }
    }

    sink.close();
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::audio::sink::NullSink;
    use crate::timing::DOT_CALIBRATION;

    fn scheduled_total_us(gen: &Generator) -> i64 {
        let mut total = 0;
        while let Some(tone) = try_take(gen) {
            total += tone.duration_us;
        }
        total
    }

    fn try_take(gen: &Generator) -> Option<Tone> {
        let tq = gen.tone_queue();
        if tq.is_empty() {
            return None;
        }
        tq.dequeue().map(|(tone, _)| tone)
    }

    #[test]
    fn test_paris_schedules_fifty_units() {
        // "PARIS" is the canonical 50-unit word; at 20 wpm that is 3.0 s.
        let gen = Generator::new(Box::new(NullSink::new(44_100)));
        gen.set_speed(20).unwrap();
        gen.enqueue_string("PARIS").unwrap();

        let unit = DOT_CALIBRATION / 20;
        assert_eq!(scheduled_total_us(&gen), 50 * unit);
    }

    #[test]
    fn test_character_layout() {
        let gen = Generator::new(Box::new(NullSink::new(44_100)));
        gen.set_speed(20).unwrap();
        gen.enqueue_character('A').unwrap();

        let unit = DOT_CALIBRATION / 20;
        let tq = gen.tone_queue();
        assert_eq!(tq.len(), 4);

        let (dot, _) = tq.dequeue().unwrap();
        assert_eq!(dot.duration_us, unit);
        assert!(dot.frequency > 0);
        assert_eq!(dot.slope_mode, SlopeMode::Standard);

        let (gap, _) = tq.dequeue().unwrap();
        assert_eq!(gap.duration_us, unit);
        assert_eq!(gap.frequency, 0);

        let (dash, _) = tq.dequeue().unwrap();
        assert_eq!(dash.duration_us, 3 * unit);

        let (eoc, _) = tq.dequeue().unwrap();
        assert_eq!(eoc.duration_us, 3 * unit);
        assert_eq!(eoc.frequency, 0);
    }

    #[test]
    fn test_space_is_a_word_gap() {
        let gen = Generator::new(Box::new(NullSink::new(44_100)));
        gen.set_speed(20).unwrap();
        gen.enqueue_character(' ').unwrap();

        let unit = DOT_CALIBRATION / 20;
        assert_eq!(scheduled_total_us(&gen), 7 * unit);
    }

    #[test]
    fn test_invalid_characters_are_rejected() {
        let gen = Generator::new(Box::new(NullSink::new(44_100)));
        assert_eq!(gen.enqueue_character('#'), Err(Error::InvalidChar('#')));
        assert_eq!(gen.enqueue_string("A#B"), Err(Error::InvalidChar('#')));
        assert_eq!(gen.tone_queue().len(), 0);

        assert!(gen.enqueue_representation(".-.-").is_ok());
        assert_eq!(
            gen.enqueue_representation(".x"),
            Err(Error::InvalidParameter("representation"))
        );
    }

    #[test]
    fn test_parameter_changes_apply_from_next_enqueue() {
        let gen = Generator::new(Box::new(NullSink::new(44_100)));
        gen.set_speed(20).unwrap();
        gen.enqueue_character('E').unwrap();

        gen.set_speed(40).unwrap();
        gen.enqueue_character('E').unwrap();

        let tq = gen.tone_queue();
        assert_eq!(tq.dequeue().unwrap().0.duration_us, DOT_CALIBRATION / 20);
        tq.dequeue().unwrap();
        assert_eq!(tq.dequeue().unwrap().0.duration_us, DOT_CALIBRATION / 40);
    }

    #[test]
    fn test_setter_ranges() {
        let gen = Generator::new(Box::new(NullSink::new(44_100)));
        assert_eq!(gen.set_speed(100), Err(Error::InvalidParameter("speed")));
        assert_eq!(gen.set_volume(101), Err(Error::InvalidParameter("volume")));
        assert_eq!(
            gen.set_frequency(9999),
            Err(Error::InvalidParameter("frequency"))
        );
        assert_eq!(
            gen.set_weighting(10),
            Err(Error::InvalidParameter("weighting"))
        );
        gen.set_weighting(60).unwrap();
        assert_eq!(gen.weighting(), 60);

        gen.set_slope(SlopeShape::Linear, 2000).unwrap();
        assert_eq!(
            gen.set_slope(SlopeShape::Linear, -1),
            Err(Error::InvalidParameter("slope_length"))
        );
    }
}
