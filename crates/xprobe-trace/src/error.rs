use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid fixed pmu counter index {index} (valid range 0..{max})")]
    InvalidFixedPmc { index: u8, max: u8 },

    #[error("generic pmu counter count {count} exceeds hardware capacity of {max}")]
    GenericPmcOverflow { count: u8, max: u8 },

    #[error("detected probe list corruption at slot {slot}: {reason}")]
    StructuralCorruption { slot: u32, reason: String },

    #[error("stale probe handle (slot {slot}, generation {generation})")]
    StaleHandle { slot: u32, generation: u32 },

    #[error("transaction event {event} is not valid in state {from}")]
    InvalidTransition { from: String, event: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Bad counter index or count, reported to the control plane.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::InvalidFixedPmc { .. } | Error::GenericPmcOverflow { .. }
        )
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::StructuralCorruption { .. })
    }
}
