//! Timing parameters.
//! Derives the low-level microsecond durations that classify received marks
//! and schedule transmitted elements from (speed, tolerance, gap, weighting).

/// Dividing this by a speed in WPM yields the dot length in microseconds:
/// the canonical word "PARIS" is 50 dot-units long.
pub const DOT_CALIBRATION: i64 = 1_200_000;

pub const SPEED_MIN: i32 = 5;
pub const SPEED_MAX: i32 = 60;
pub const SPEED_INITIAL: i32 = 12;

pub const TOLERANCE_MIN: i32 = 0;
pub const TOLERANCE_MAX: i32 = 90;
pub const TOLERANCE_INITIAL: i32 = 50;

pub const GAP_MIN: i32 = 0;
pub const GAP_MAX: i32 = 60;
pub const GAP_INITIAL: i32 = 0;

pub const WEIGHTING_MIN: i32 = 20;
pub const WEIGHTING_MAX: i32 = 80;
pub const WEIGHTING_INITIAL: i32 = 50;

pub const FREQUENCY_MIN: i32 = 0;
pub const FREQUENCY_MAX: i32 = 4000;
pub const FREQUENCY_INITIAL: i32 = 800;

pub const VOLUME_MIN: i32 = 0;
pub const VOLUME_MAX: i32 = 100;
pub const VOLUME_INITIAL: i32 = 70;

/// Marks shorter than this are discarded as noise by default:
/// half a dot at the maximum speed.
pub const NOISE_THRESHOLD_INITIAL: i64 = (DOT_CALIBRATION / SPEED_MAX as i64) / 2;

/// Dot length at `speed` WPM, in microseconds.
pub fn unit_length(speed: i32) -> i64 {
    DOT_CALIBRATION / speed as i64
}

/// Essential receiver parameters. Changing any of them invalidates the
/// derived [`ReceiveTimings`], which the receiver rebuilds lazily.
#[derive(Debug, Clone, Copy)]
pub struct ReceiveParams {
    pub speed: i32,
    pub tolerance: i32,
    pub gap: i32,
    pub adaptive: bool,
    /// Marks at most this long are treated as noise spikes; 0 disables.
    pub noise_spike_threshold: i64,
    /// Boundary between dot and dash in adaptive mode, tracked from the
    /// incoming data. Always effectively two dot lengths.
    pub adaptive_speed_threshold: i64,
}

impl Default for ReceiveParams {
    fn default() -> Self {
        Self {
            speed: SPEED_INITIAL,
            tolerance: TOLERANCE_INITIAL,
            gap: GAP_INITIAL,
            adaptive: false,
            noise_spike_threshold: NOISE_THRESHOLD_INITIAL,
            adaptive_speed_threshold: 2 * unit_length(SPEED_INITIAL),
        }
    }
}

/// Derived mark and space duration ranges, all in microseconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReceiveTimings {
    pub dot_ideal: i64,
    pub dot_min: i64,
    pub dot_max: i64,

    pub dash_ideal: i64,
    pub dash_min: i64,
    pub dash_max: i64,

    /// Inter-mark space (end of mark).
    pub eom_ideal: i64,
    pub eom_min: i64,
    pub eom_max: i64,

    /// Inter-character gap (end of character).
    pub eoc_ideal: i64,
    pub eoc_min: i64,
    pub eoc_max: i64,

    pub additional_delay: i64,
    pub adjustment_delay: i64,
}

impl ReceiveTimings {
    /// Rebuild the duration ranges from the essential parameters.
    ///
    /// In adaptive mode the speed is first recomputed from the tracked
    /// threshold; in fixed mode the threshold follows the speed. The
    /// function is deterministic and idempotent for unchanged parameters.
    pub fn sync(params: &mut ReceiveParams) -> Self {
        if params.adaptive {
            let half = (params.adaptive_speed_threshold / 2).max(1);
            params.speed = (DOT_CALIBRATION / half) as i32;
        } else {
            params.adaptive_speed_threshold = 2 * unit_length(params.speed);
        }

        // The caller clamps out-of-range adaptive speeds afterwards; avoid a
        // zero unit in the meantime.
        let unit = unit_length(params.speed.max(1));

        let mut t = ReceiveTimings {
            dot_ideal: unit,
            dash_ideal: 3 * unit,
            eom_ideal: unit,
            eoc_ideal: 3 * unit,
            additional_delay: params.gap as i64 * unit,
            ..Default::default()
        };
        t.adjustment_delay = (7 * t.additional_delay) / 3;

        if params.adaptive {
            t.dot_min = 0;
            t.dot_max = 2 * t.dot_ideal;

            // Any mark longer than a dot is a dash. The ranges touch at
            // dot_max; the dot range is checked first, so the tie is a dot.
            t.dash_min = t.dot_max;
            t.dash_max = i64::MAX;

            t.eom_min = t.dot_min;
            t.eom_max = t.dot_max;
            t.eoc_min = t.eom_max;
            t.eoc_max = 5 * t.dot_ideal;
        } else {
            // The tolerance window is derived from the dot length and applied
            // to dots and dashes alike, which keeps dot_max below dash_min
            // for every permitted tolerance.
            let tolerance = t.dot_ideal * params.tolerance as i64 / 100;
            t.dot_min = t.dot_ideal - tolerance;
            t.dot_max = t.dot_ideal + tolerance;
            t.dash_min = t.dash_ideal - tolerance;
            t.dash_max = t.dash_ideal + tolerance;

            t.eom_min = t.dot_min;
            t.eom_max = t.dot_max;

            // The inter-character gap opens at the dash minimum and closes
            // at the dash maximum plus the "Farnsworth" delays.
            t.eoc_min = t.dash_min;
            t.eoc_max = t.dash_max + t.additional_delay + t.adjustment_delay;
        }

        t
    }
}

/// Essential send-side parameters.
#[derive(Debug, Clone, Copy)]
pub struct SendParams {
    pub speed: i32,
    pub gap: i32,
    pub weighting: i32,
}

impl Default for SendParams {
    fn default() -> Self {
        Self {
            speed: SPEED_INITIAL,
            gap: GAP_INITIAL,
            weighting: WEIGHTING_INITIAL,
        }
    }
}

/// Element and delay durations for the send path, in microseconds.
///
/// A character is scheduled as mark/`eoe_delay` pairs, with the trailing
/// silence replaced by `eoc_delay` after its last element. At a word
/// boundary the trailing silence is `eoe_delay + eow_delay`: a full seven
/// units at gap 0.
#[derive(Debug, Clone, Copy)]
pub struct SendTimings {
    pub unit: i64,
    pub dot_length: i64,
    pub dash_length: i64,
    pub eoe_delay: i64,
    pub eoc_delay: i64,
    pub eow_delay: i64,
    pub additional_delay: i64,
    pub adjustment_delay: i64,
}

impl SendTimings {
    /// Rebuild the element durations from the essential parameters.
    ///
    /// Weighting shifts duration from dashes to dots (or back) while keeping
    /// `dot + dash` at four units, so the overall speed is unchanged. The
    /// inter-element delay carries the compensating 28/22 factor so the
    /// mark/space rhythm stays on the grid.
    pub fn sync(params: &SendParams) -> Self {
        let unit = unit_length(params.speed);
        let weighting = 2 * (params.weighting as i64 - 50) * unit / 100;

        let additional_delay = params.gap as i64 * unit;
        let adjustment_delay = (7 * additional_delay) / 3;

        SendTimings {
            unit,
            dot_length: unit + weighting,
            dash_length: 3 * unit - weighting,
            eoe_delay: unit - (28 * weighting) / 22,
            eoc_delay: 3 * unit + additional_delay,
            eow_delay: 6 * unit + adjustment_delay,
            additional_delay,
            adjustment_delay,
        }
    }
}
