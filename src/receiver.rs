//! The receiver: turns keying edges into marks and spaces, and marks and
//! spaces into characters.
//!
//! Feed it `mark_begin`/`mark_end` pairs as the key goes down and up (or
//! ready-made marks through `add_dot`/`add_dash`), then poll it. A poll
//! succeeds once the silence after the last mark has grown into an
//! inter-character or inter-word gap.

use std::time::Instant;

use log::{debug, trace};

use crate::coding::morse;
use crate::error::{Error, Result};
use crate::misc::RingBuffer;
use crate::timing::{
    ReceiveParams, ReceiveTimings, GAP_MAX, GAP_MIN, SPEED_MAX, SPEED_MIN, TOLERANCE_MAX,
    TOLERANCE_MIN,
};

/// One slot more than the longest table representation, so every valid
/// character fits and the next mark trips [`Error::BufferFull`].
const REPRESENTATION_CAPACITY: usize = morse::MAX_REPRESENTATION_LENGTH + 1;

const STATISTICS_CAPACITY: usize = 256;

/// Moving averages run over this many recent marks.
const AVERAGING_LENGTH: usize = 4;

/// Receiver state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Representation buffer empty, ready for the first mark.
    Idle,
    /// Inside a mark (key is down).
    Mark,
    /// Inter-mark space within a character.
    Space,
    /// The gap after a completed character.
    EocGap,
    /// The gap after a completed word.
    EowGap,
    /// Gap after a character, with an error condition.
    EocGapErr,
    /// Gap after a word, with an error condition.
    EowGapErr,
}

/// What kind of duration a statistics record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum StatKind {
    #[default]
    None,
    Dot,
    Dash,
    ImarkSpace,
    IcharSpace,
}

#[derive(Debug, Clone, Copy, Default)]
struct StatRecord {
    kind: StatKind,
    /// Observed minus ideal duration, in microseconds.
    delta: i64,
}

/// Standard deviations of observed durations from their ideals, in
/// microseconds. Zero where no records exist.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Statistics {
    pub dot_sd: f64,
    pub dash_sd: f64,
    pub imark_space_sd: f64,
    pub ichar_space_sd: f64,
}

/// Moving average of recent mark lengths, used for adaptive speed tracking.
struct Averaging {
    marks: RingBuffer<i64, AVERAGING_LENGTH>,
}

impl Averaging {
    fn new(initial: i64) -> Self {
        Self {
            marks: RingBuffer::new_filled(initial),
        }
    }

    fn reset(&mut self, initial: i64) {
        self.marks = RingBuffer::new_filled(initial);
    }

    fn update(&mut self, mark_len: i64) {
        self.marks.push(mark_len);
    }

    fn average(&self) -> i64 {
        self.marks.avg()
    }
}

/// A representation handed over after an end-of-character or end-of-word gap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reception {
    pub representation: String,
    pub is_end_of_word: bool,
    pub is_error: bool,
}

/// A received character, as produced by [`Receiver::poll_character`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharReception {
    pub character: char,
    pub is_end_of_word: bool,
    pub is_error: bool,
}

pub struct Receiver {
    state: State,
    params: ReceiveParams,
    timings: ReceiveTimings,
    in_sync: bool,

    mark_start: Option<Instant>,
    mark_end: Option<Instant>,

    representation: [u8; REPRESENTATION_CAPACITY],
    cursor: usize,

    statistics: RingBuffer<StatRecord, STATISTICS_CAPACITY>,
    dot_averaging: Averaging,
    dash_averaging: Averaging,
}

impl Receiver {
    pub fn new() -> Self {
        let mut params = ReceiveParams::default();
        let timings = ReceiveTimings::sync(&mut params);

        Self {
            state: State::Idle,
            params,
            timings,
            in_sync: true,
            mark_start: None,
            mark_end: None,
            representation: [0; REPRESENTATION_CAPACITY],
            cursor: 0,
            statistics: RingBuffer::new(),
            dot_averaging: Averaging::new(timings.dot_ideal),
            dash_averaging: Averaging::new(timings.dash_ideal),
        }
    }

    // == Parameters ==

    /// Set the fixed receive speed in WPM.
    /// Fails with [`Error::AdaptiveConflict`] while adaptive tracking is on.
    pub fn set_speed(&mut self, wpm: i32) -> Result<()> {
        if self.params.adaptive {
            return Err(Error::AdaptiveConflict);
        }
        if !(SPEED_MIN..=SPEED_MAX).contains(&wpm) {
            return Err(Error::InvalidParameter("speed"));
        }

        if wpm != self.params.speed {
            self.params.speed = wpm;
            self.in_sync = false;
            self.sync_parameters();
        }

        Ok(())
    }

    pub fn speed(&self) -> i32 {
        self.params.speed
    }

    /// Set the mark length tolerance in percent.
    pub fn set_tolerance(&mut self, tolerance: i32) -> Result<()> {
        if !(TOLERANCE_MIN..=TOLERANCE_MAX).contains(&tolerance) {
            return Err(Error::InvalidParameter("tolerance"));
        }

        if tolerance != self.params.tolerance {
            self.params.tolerance = tolerance;
            self.in_sync = false;
            self.sync_parameters();
        }

        Ok(())
    }

    pub fn tolerance(&self) -> i32 {
        self.params.tolerance
    }

    /// Set the extra inter-character gap in units.
    pub fn set_gap(&mut self, gap: i32) -> Result<()> {
        if !(GAP_MIN..=GAP_MAX).contains(&gap) {
            return Err(Error::InvalidParameter("gap"));
        }

        if gap != self.params.gap {
            self.params.gap = gap;
            self.in_sync = false;
            self.sync_parameters();
        }

        Ok(())
    }

    pub fn gap(&self) -> i32 {
        self.params.gap
    }

    /// Marks at most this long (µs) are discarded as noise spikes; 0 disables
    /// the filter.
    pub fn set_noise_spike_threshold(&mut self, threshold: i64) -> Result<()> {
        if threshold < 0 {
            return Err(Error::InvalidParameter("noise_spike_threshold"));
        }
        self.params.noise_spike_threshold = threshold;
        Ok(())
    }

    pub fn noise_spike_threshold(&self) -> i64 {
        self.params.noise_spike_threshold
    }

    /// Enable or disable adaptive speed tracking.
    ///
    /// Turning it on re-seeds the dot and dash averages with the current
    /// ideal lengths, so tracking starts from the configured speed.
    pub fn set_adaptive(&mut self, adaptive: bool) {
        if self.params.adaptive == adaptive {
            return;
        }

        self.params.adaptive = adaptive;
        self.in_sync = false;
        self.sync_parameters();

        if adaptive {
            self.dot_averaging.reset(self.timings.dot_ideal);
            self.dash_averaging.reset(self.timings.dash_ideal);
        }
    }

    pub fn is_adaptive(&self) -> bool {
        self.params.adaptive
    }

    /// The derived duration ranges, synchronized to the current parameters.
    pub fn timings(&mut self) -> ReceiveTimings {
        self.sync_parameters();
        self.timings
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Number of marks currently buffered.
    pub fn buffer_len(&self) -> usize {
        self.cursor
    }

    pub fn buffer_capacity(&self) -> usize {
        REPRESENTATION_CAPACITY
    }

    fn sync_parameters(&mut self) {
        if self.in_sync {
            return;
        }

        self.timings = ReceiveTimings::sync(&mut self.params);
        self.in_sync = true;
        trace!(
            "receive timings resynced: {} wpm, dot {}-{} us, dash {}-{} us",
            self.params.speed,
            self.timings.dot_min,
            self.timings.dot_max,
            self.timings.dash_min,
            self.timings.dash_max
        );
    }

    fn set_state(&mut self, state: State) {
        trace!("receive state {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    // == Keying edges ==

    /// The key went down. With `timestamp` of `None` the edge is stamped now.
    pub fn mark_begin(&mut self, timestamp: Option<Instant>) -> Result<()> {
        // A mark can only begin while idle or inside a character's
        // inter-mark space.
        if self.state != State::Idle && self.state != State::Space {
            return Err(Error::OutOfOrder);
        }

        let t = timestamp.unwrap_or_else(Instant::now);

        if self.state == State::Space {
            // The previous mark's end is known, so the length of the space
            // we just left can go into the statistics.
            let end = self.mark_end.ok_or(Error::OutOfOrder)?;
            let space_len = t
                .checked_duration_since(end)
                .ok_or(Error::InvalidTimestamp)?
                .as_micros() as i64;
            self.record_stat(StatKind::ImarkSpace, space_len);
        }

        self.mark_start = Some(t);
        self.set_state(State::Mark);

        Ok(())
    }

    /// The key went up. Classifies the finished mark and buffers it.
    pub fn mark_end(&mut self, timestamp: Option<Instant>) -> Result<()> {
        if self.state != State::Mark {
            return Err(Error::OutOfOrder);
        }

        let start = self.mark_start.ok_or(Error::OutOfOrder)?;
        // Keep the previous end timestamp around in case this mark turns out
        // to be a noise spike and has to be undone.
        let saved_end = self.mark_end;

        let t = timestamp.unwrap_or_else(Instant::now);
        let mark_len = t
            .checked_duration_since(start)
            .ok_or(Error::InvalidTimestamp)?
            .as_micros() as i64;
        self.mark_end = Some(t);

        if self.params.noise_spike_threshold > 0 && mark_len <= self.params.noise_spike_threshold {
            // Restore the state from before the matching mark_begin(): the
            // buffer cursor tells whether we were idle or mid-character.
            self.set_state(if self.cursor == 0 {
                State::Idle
            } else {
                State::Space
            });
            self.mark_end = saved_end;
            debug!(
                "{mark_len} us mark discarded as spike noise (threshold {} us)",
                self.params.noise_spike_threshold
            );
            return Err(Error::Noise);
        }

        self.sync_parameters();
        let mark = match self.identify_mark(mark_len) {
            Some(mark) => mark,
            None => {
                // Classification only told us the mark fits neither range;
                // which error gap we are in depends on how long it was.
                debug!(
                    "unrecognized {mark_len} us mark (dot {}-{}, dash {}-{})",
                    self.timings.dot_min,
                    self.timings.dot_max,
                    self.timings.dash_min,
                    self.timings.dash_max
                );
                self.set_state(if mark_len > self.timings.eoc_max {
                    State::EowGapErr
                } else {
                    State::EocGapErr
                });
                return Err(Error::Unrecognizable);
            }
        };

        if self.params.adaptive {
            self.update_averages(mark_len, mark);
        }

        // Update the statistics after the averages: on a speed slope the
        // tracked ideals lag the observed lengths less this way.
        self.record_stat(
            if mark == b'.' {
                StatKind::Dot
            } else {
                StatKind::Dash
            },
            mark_len,
        );

        self.push_mark(mark)?;
        self.set_state(State::Space);

        Ok(())
    }

    /// Buffer a dot whose end was observed at `timestamp`.
    ///
    /// This is the synthetic path for callers that have already classified
    /// the mark themselves; it updates neither the statistics nor the
    /// adaptive averages.
    pub fn add_dot(&mut self, timestamp: Option<Instant>) -> Result<()> {
        self.add_mark(timestamp, b'.')
    }

    /// Buffer a dash whose end was observed at `timestamp`.
    pub fn add_dash(&mut self, timestamp: Option<Instant>) -> Result<()> {
        self.add_mark(timestamp, b'-')
    }

    fn add_mark(&mut self, timestamp: Option<Instant>, mark: u8) -> Result<()> {
        if self.state != State::Idle && self.state != State::Space {
            return Err(Error::OutOfOrder);
        }

        // Only the end timestamp matters: polling measures the growing
        // space against it to find character and word boundaries.
        self.mark_end = Some(timestamp.unwrap_or_else(Instant::now));

        self.push_mark(mark)?;
        self.set_state(State::Space);

        Ok(())
    }

    fn push_mark(&mut self, mark: u8) -> Result<()> {
        self.representation[self.cursor] = mark;
        self.cursor += 1;

        if self.cursor == REPRESENTATION_CAPACITY {
            debug!("representation buffer full");
            self.set_state(State::EocGapErr);
            return Err(Error::BufferFull);
        }

        Ok(())
    }

    /// Classify a mark length against the synced dot and dash ranges.
    /// In adaptive mode the ranges cover everything, so this cannot fail.
    fn identify_mark(&self, mark_len: i64) -> Option<u8> {
        let t = &self.timings;
        if mark_len >= t.dot_min && mark_len <= t.dot_max {
            Some(b'.')
        } else if mark_len >= t.dash_min && mark_len <= t.dash_max {
            Some(b'-')
        } else {
            None
        }
    }

    fn update_averages(&mut self, mark_len: i64, mark: u8) {
        if mark == b'.' {
            self.dot_averaging.update(mark_len);
        } else {
            self.dash_averaging.update(mark_len);
        }

        let avg_dot = self.dot_averaging.average();
        let avg_dash = self.dash_averaging.average();
        self.params.adaptive_speed_threshold = avg_dot + (avg_dash - avg_dot) / 2;

        self.in_sync = false;
        self.sync_parameters();

        if self.params.speed < SPEED_MIN || self.params.speed > SPEED_MAX {
            self.params.speed = self.params.speed.clamp(SPEED_MIN, SPEED_MAX);

            // Resync once in fixed mode so the threshold is rebuilt from the
            // clamped speed, then again in adaptive mode for the ranges.
            self.params.adaptive = false;
            self.in_sync = false;
            self.sync_parameters();

            self.params.adaptive = true;
            self.in_sync = false;
            self.sync_parameters();
        }
    }

    // == Polling ==

    /// Poll for a finished representation.
    ///
    /// Succeeds once the space measured from the last mark's end to `now` has
    /// grown into an inter-character or inter-word gap. Returns
    /// [`Error::TryAgain`] while inside a mark, while idle, or while the
    /// space is still short enough to be an inter-mark space. Once the
    /// receiver has settled in an end-of-word gap, repeated polls return the
    /// same representation and ignore the timestamp.
    pub fn poll_representation(&mut self, now: Option<Instant>) -> Result<Reception> {
        match self.state {
            State::EowGap | State::EowGapErr => return Ok(self.receive_eow()),
            State::Idle | State::Mark => return Err(Error::TryAgain),
            State::Space | State::EocGap | State::EocGapErr => {}
        }

        let end = self.mark_end.ok_or(Error::TryAgain)?;
        let now = now.unwrap_or_else(Instant::now);
        let space_len = now
            .checked_duration_since(end)
            .ok_or(Error::InvalidTimestamp)?
            .as_micros() as i64;

        self.sync_parameters();

        if space_len >= self.timings.eoc_min && space_len <= self.timings.eoc_max {
            Ok(self.receive_eoc(space_len))
        } else if space_len > self.timings.eoc_max {
            Ok(self.receive_eow())
        } else {
            // Still inside the character.
            Err(Error::TryAgain)
        }
    }

    /// The space is an inter-character gap: the buffer holds a complete
    /// character's representation.
    fn receive_eoc(&mut self, space_len: i64) -> Reception {
        if self.state == State::Space {
            self.record_stat(StatKind::IcharSpace, space_len);
            self.set_state(State::EocGap);
        }

        Reception {
            representation: self.representation_string(),
            is_end_of_word: false,
            is_error: self.state == State::EocGapErr,
        }
    }

    /// The space outgrew the inter-character gap: this is a word boundary.
    fn receive_eow(&mut self) -> Reception {
        match self.state {
            State::Space | State::EocGap => self.set_state(State::EowGap),
            State::EocGapErr => self.set_state(State::EowGapErr),
            State::EowGap | State::EowGapErr => {}
            // Unreachable per the caller's state screening.
            State::Idle | State::Mark => {}
        }

        Reception {
            representation: self.representation_string(),
            is_end_of_word: true,
            is_error: self.state == State::EowGapErr,
        }
    }

    /// Poll for a finished character: [`Receiver::poll_representation`]
    /// composed with the reverse Morse lookup.
    pub fn poll_character(&mut self, now: Option<Instant>) -> Result<CharReception> {
        let reception = self.poll_representation(now)?;
        let character = morse::representation_to_character(&reception.representation)
            .ok_or(Error::Unrecognizable)?;

        Ok(CharReception {
            character,
            is_end_of_word: reception.is_end_of_word,
            is_error: reception.is_error,
        })
    }

    fn representation_string(&self) -> String {
        self.representation[..self.cursor]
            .iter()
            .map(|&b| b as char)
            .collect()
    }

    /// Reset the representation buffer and the state machine, keeping the
    /// statistics. Call after every successful or terminating poll.
    pub fn clear_buffer(&mut self) {
        self.cursor = 0;
        self.set_state(State::Idle);
    }

    /// Full reset: buffer, state machine and statistics.
    pub fn reset(&mut self) {
        self.clear_buffer();
        self.statistics = RingBuffer::new();
    }

    // == Statistics ==

    fn record_stat(&mut self, kind: StatKind, len: i64) {
        self.sync_parameters();

        let ideal = match kind {
            StatKind::Dot => self.timings.dot_ideal,
            StatKind::Dash => self.timings.dash_ideal,
            StatKind::ImarkSpace => self.timings.eom_ideal,
            StatKind::IcharSpace => self.timings.eoc_ideal,
            StatKind::None => len,
        };

        self.statistics.push(StatRecord {
            kind,
            delta: len - ideal,
        });
    }

    fn stddev(&self, kind: StatKind) -> f64 {
        let mut sum_of_squares = 0.0;
        let mut count = 0;
        for record in &self.statistics.data {
            match record.kind {
                k if k == kind => {
                    sum_of_squares += (record.delta * record.delta) as f64;
                    count += 1;
                }
                // A cleared buffer refills from slot zero, so the first
                // untouched slot ends the scan.
                StatKind::None => break,
                _ => {}
            }
        }

        if count > 0 {
            (sum_of_squares / count as f64).sqrt()
        } else {
            0.0
        }
    }

    /// Timing accuracy of the received CW so far.
    pub fn statistics(&self) -> Statistics {
        Statistics {
            dot_sd: self.stddev(StatKind::Dot),
            dash_sd: self.stddev(StatKind::Dash),
            imark_space_sd: self.stddev(StatKind::ImarkSpace),
            ichar_space_sd: self.stddev(StatKind::IcharSpace),
        }
    }
}

impl Default for Receiver {
    fn default() -> Self {
        Self::new()
    }
}
