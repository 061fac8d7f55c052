use std::io;

use thiserror::Error;

use crate::pins::Direction;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no pin numbering mode has been set")]
    ModeNotSet,
    #[error("the pin numbering mode is already set")]
    ModeAlreadySet,
    #[error("channel {0} is already configured")]
    AlreadyConfigured(u32),
    #[error("channel {0} is not configured")]
    NotConfigured(u32),
    #[error("channel {channel} is configured for {configured}")]
    WrongDirection { channel: u32, configured: Direction },
    #[error("edge detection is already enabled on channel {0}")]
    AlreadyWatching(u32),
    #[error("edge detection is not enabled on channel {0}")]
    NotWatching(u32),
    #[error("channel {0} has no pin under the active numbering mode")]
    UnknownChannel(String),
    #[error("{0}")]
    OutOfRange(String),
    #[error("channel and value lists differ in length")]
    LengthMismatch,
    #[error("resource busy: {0}")]
    Busy(String),
    #[error("pwm channel has been closed")]
    Closed,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
