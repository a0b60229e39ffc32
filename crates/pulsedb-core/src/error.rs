//! Core decode errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("truncated input: needed {needed} bytes, had {had}")]
    Truncated { needed: usize, had: usize },

    #[error("invalid value tag: {0}")]
    InvalidTag(u8),

    #[error("invalid length prefix: {0}")]
    InvalidLength(i32),

    #[error("map key is not valid UTF-8")]
    InvalidKey,
}

pub type Result<T> = std::result::Result<T, Error>;
