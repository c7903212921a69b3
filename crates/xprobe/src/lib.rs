pub mod cli;
pub mod control;
pub mod demo;
pub mod error;
pub mod paths;
pub mod report;
pub mod session;
pub mod transport;

pub use error::{Error, Result};
pub use session::{Session, SessionConfig};
