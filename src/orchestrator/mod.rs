//! Stage execution and multi-stage progression.

mod controller;
mod stage;

pub use controller::{ProgressionController, RunOutcome, RunStatus};
pub use stage::{StageOutcome, StageRunner};
