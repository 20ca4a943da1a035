//! Keying-edge observation.
//! A generator can be given a bridge that mirrors its tone boundaries as
//! key-down / key-up callbacks, which is how a generator drives a receiver
//! for an end-to-end loopback.

use std::time::Instant;

/// Observes keying edges. The callback runs on the generator's consumer
/// thread, right before a tone starts sounding and right after it ends, so
/// it must not block for long.
pub struct KeyBridge {
    callback: Box<dyn FnMut(Instant, bool) + Send>,
    is_down: bool,
}

impl KeyBridge {
    pub fn new(callback: impl FnMut(Instant, bool) + Send + 'static) -> Self {
        Self {
            callback: Box::new(callback),
            is_down: false,
        }
    }

    /// Report the key state at `timestamp`. Only actual edges reach the
    /// callback; repeated downs or ups are dropped.
    pub(crate) fn set(&mut self, timestamp: Instant, down: bool) {
        if down != self.is_down {
            self.is_down = down;
            (self.callback)(timestamp, down);
        }
    }
}
