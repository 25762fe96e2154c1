pub mod affinity;
pub mod chipset;
pub mod cpuid;
pub mod poll;

pub use affinity::AffinityGuard;
pub use chipset::Chipset;
pub use poll::{poll_until, PollOutcome, PollPolicy};
