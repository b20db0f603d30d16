pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{op} is not supported on the reverse-offload path")]
    Unsupported { op: &'static str },

    #[error("invalid runtime configuration: {0}")]
    InvalidConfig(String),

    #[error("channel {id} out of range: pool has {channels} channels")]
    ChannelOutOfRange { id: usize, channels: usize },

    #[error("channel {id} is already bound to an execution group")]
    ChannelInUse { id: usize },

    #[error("channel {id} already has a drain attached")]
    DrainInUse { id: usize },

    #[error("shared pool layout mismatch: {field} is {found}, expected {expected}")]
    LayoutMismatch {
        field: &'static str,
        expected: u64,
        found: u64,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
