//! Foundation utilities for the odx index subsystem.

pub mod error;
pub mod lockfile;
pub mod progress;

pub use error::{LockError, UtilError};
pub use lockfile::LockFile;
pub use progress::Progress;

pub type Result<T> = std::result::Result<T, UtilError>;
