//! Everything that talks to the external solver.

pub mod bridge;
pub mod output;
pub mod protocol;

pub use bridge::{Minimizer, MinimizerBridge, ProcessMinimizer, partition_even};
pub use output::Slot;
pub use protocol::{Command, Script, StageSession, TaperProvider};
