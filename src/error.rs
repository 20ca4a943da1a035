//! Error types shared by the generator and receiver.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while generating or receiving CW.
///
/// [`Error::TryAgain`] and [`Error::Noise`] are informational: a well-behaved
/// caller simply polls again. The rest are hard errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A parameter value falls outside its documented range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    /// The receive speed cannot be set while adaptive tracking is enabled.
    #[error("receive speed is tracked automatically in adaptive mode")]
    AdaptiveConflict,

    /// A keying edge arrived in a state that cannot accept it.
    #[error("keying edge out of order")]
    OutOfOrder,

    /// A timestamp ran backwards relative to the previous edge.
    #[error("timestamp is not monotonic")]
    InvalidTimestamp,

    /// The receiver's representation buffer is full.
    #[error("representation buffer full")]
    BufferFull,

    /// The tone queue is at capacity.
    #[error("tone queue full")]
    QueueFull,

    /// A mark or representation could not be matched against the Morse table.
    #[error("unrecognizable mark or representation")]
    Unrecognizable,

    /// The receiver has nothing to report yet; poll again later.
    #[error("not ready, try again")]
    TryAgain,

    /// A mark was shorter than the noise spike threshold and was discarded.
    #[error("mark discarded as a noise spike")]
    Noise,

    /// A character is not present in the Morse table.
    #[error("character cannot be sent as Morse: {0:?}")]
    InvalidChar(char),

    /// The audio sink reported a problem.
    #[error("audio sink: {0}")]
    Sink(String),

    /// The generator has no running consumer thread.
    #[error("generator is not running")]
    NotRunning,
}

impl Error {
    /// True for the informational kinds that callers are expected to retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TryAgain | Error::Noise)
    }
}
