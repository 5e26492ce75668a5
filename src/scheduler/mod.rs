pub mod decision;
pub mod generate;
pub mod sweep;

pub use decision::is_due;
pub use generate::{GenerationOutcome, Generator};
pub use sweep::{SweepFailure, SweepReport, Sweeper};
