pub mod enricher;
pub mod polling;

pub use enricher::EnricherRuntime;
pub use polling::{PendingInputPoller, PendingInputProbe};
