//! Record validation and run orchestration.

pub mod pipeline;
pub mod validator;

pub use pipeline::PipelineRunner;
pub use validator::{RecordValidator, Rejection, ValidationOutcome};
