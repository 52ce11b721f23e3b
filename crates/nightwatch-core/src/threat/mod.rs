mod machine;
mod scheduler;
mod state;

pub use machine::{ThreatMachine, ThreatSnapshot};
pub use scheduler::ThreatScheduler;
pub use state::{FinalSequence, SessionOutcome, ThreatSession, ThreatState};
