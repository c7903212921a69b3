use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Probe not found: {0}")]
    ProbeNotFound(String),

    #[error("Peer disconnected")]
    Disconnected,

    #[error("Malformed frame header {header:?}")]
    MalformedFrame { header: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Trace(#[from] xprobe_trace::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL_ERROR: i32 = 1;
    pub const INVALID_ARGUMENTS: i32 = 2;
    pub const PROBE_NOT_FOUND: i32 = 3;
    pub const CONFIGURATION_ERROR: i32 = 4;
    pub const CORRUPTION: i32 = 5;
    pub const DISCONNECTED: i32 = 6;
}

impl Error {
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::ProbeNotFound(_) => exit_code::PROBE_NOT_FOUND,
            Error::InvalidArgument(_) => exit_code::INVALID_ARGUMENTS,
            Error::Disconnected | Error::MalformedFrame { .. } => exit_code::DISCONNECTED,
            Error::Trace(err) if err.is_configuration() => exit_code::CONFIGURATION_ERROR,
            Error::Trace(err) if err.is_corruption() => exit_code::CORRUPTION,
            _ => exit_code::GENERAL_ERROR,
        }
    }
}
