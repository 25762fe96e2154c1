//! Bounded polling
//!
//! Hardware handshakes (force wake, flash cycle done, ...) are waited on with
//! a fixed number of attempts separated by a fixed sleep, so a register that
//! never settles costs at most `attempts * interval`.

use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PollPolicy {
    pub attempts: u32,
    #[serde(with = "millis")]
    pub interval: Duration,
}

impl PollPolicy {
    pub const DEFAULT_ATTEMPTS: u32 = 200;
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(10);

    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_ATTEMPTS, Self::DEFAULT_INTERVAL)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The predicate held for this value
    Ready(u64),
    /// Every attempt was used; `last` is the final value observed
    NotReady { last: u64, attempts: u32 },
}


/// Sample `read` until `ready` accepts a value or the policy is exhausted
///
/// Errors from `read` end the poll immediately. No sleep follows the last
/// attempt.
pub fn poll_until<R, P>(policy: &PollPolicy, mut read: R, ready: P) -> Result<PollOutcome>
where
    R: FnMut() -> Result<u64>,
    P: Fn(u64) -> bool,
{
    let mut last = 0;
    for attempt in 1..=policy.attempts {
        last = read()?;
        if ready(last) {
            tracing::debug!("Poll satisfied after {} attempt(s): 0x{:X}", attempt, last);
            return Ok(PollOutcome::Ready(last));
        }
        if attempt < policy.attempts {
            std::thread::sleep(policy.interval);
        }
    }
    tracing::debug!(
        "Poll gave up after {} attempt(s), last value 0x{:X}",
        policy.attempts,
        last
    );
    Ok(PollOutcome::NotReady {
        last,
        attempts: policy.attempts,
    })
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
