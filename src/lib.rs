//! CW (Morse code) signal processing over a sound card.
//!
//! The send path goes character → representation → tones → sine samples →
//! audio sink, gated on a bounded [`ToneQueue`] between the client and the
//! generator's consumer thread. The receive path goes keying edge →
//! [`Receiver`] state machine → representation → character, driven by
//! polling.
//!
//! ```no_run
//! use radio_morse::{audio::sink::NullSink, Generator};
//!
//! let mut gen = Generator::new(Box::new(NullSink::new(44_100)));
//! gen.start().unwrap();
//! gen.enqueue_string("CQ CQ").unwrap();
//! gen.stop().unwrap();
//! ```

pub mod audio;
pub mod coding;
pub mod error;
pub mod generator;
pub mod key;
pub mod misc;
pub mod receiver;
pub mod timing;
pub mod tone_queue;

pub use error::{Error, Result};
pub use generator::Generator;
pub use key::KeyBridge;
pub use receiver::{CharReception, Receiver, Reception};
pub use tone_queue::{QueueState, SlopeMode, Tone, ToneQueue};
