mod error;
mod signature;

pub use error::{Result, TaskError};
pub use signature::{Args, Kwargs, TaskSignature};
