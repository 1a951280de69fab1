//! Domain value types for Vigil.
//!
//! - `ResultEnvelope`: uniform success/failure record for every operation
//! - `ErrorKind`: closed failure taxonomy with static retryability
//! - `WorkerOutput` / `WorkerFailure`: raw worker outcomes
//! - `VigilError`: framework contract and setup errors

pub mod envelope;
pub mod error;
pub mod kind;
pub mod outcome;

pub use envelope::{EnvelopeParts, Payload, ResultEnvelope};
pub use error::{Result, VigilError};
pub use kind::ErrorKind;
pub use outcome::{WorkerFailure, WorkerOutput};
