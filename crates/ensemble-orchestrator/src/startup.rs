//! Strategies for bringing the whole specialist roster up.
//!
//! Opening many speech sessions at once can trip provider rate limits, so
//! `start_all` spreads its invocations according to a [`StartupPolicy`].

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum StartupPolicy {
    /// Every invocation at once.
    Parallel,
    /// Invocation `i` begins after `i * jitter_ms`; all run concurrently.
    Staggered { jitter_ms: u64 },
    /// One at a time, with `delay_ms` between the end of one invocation and
    /// the start of the next.
    Sequential { delay_ms: u64 },
}

impl Default for StartupPolicy {
    fn default() -> Self {
        Self::Staggered { jitter_ms: 500 }
    }
}

impl StartupPolicy {
    /// Runs `launch` once per id and returns the outputs in id order.
    pub async fn run<F, Fut, T>(self, ids: Vec<String>, launch: F) -> Vec<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = T>,
    {
        match self {
            Self::Parallel => join_all(ids.into_iter().map(launch)).await,
            Self::Staggered { jitter_ms } => {
                let jitter = Duration::from_millis(jitter_ms);
                join_all(ids.into_iter().enumerate().map(|(index, id)| {
                    let offset = stagger_offset(jitter, index);
                    let invocation = launch(id);
                    async move {
                        if !offset.is_zero() {
                            tokio::time::sleep(offset).await;
                        }
                        invocation.await
                    }
                }))
                .await
            }
            Self::Sequential { delay_ms } => {
                let delay = Duration::from_millis(delay_ms);
                let mut outputs = Vec::with_capacity(ids.len());
                for (index, id) in ids.into_iter().enumerate() {
                    if index > 0 && !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    outputs.push(launch(id).await);
                }
                outputs
            }
        }
    }
}

/// Start offset of the `index`-th staggered invocation, saturating.
fn stagger_offset(jitter: Duration, index: usize) -> Duration {
    jitter.saturating_mul(u32::try_from(index).unwrap_or(u32::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn ids() -> Vec<String> {
        ["a", "b", "c"].iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn stagger_offset_saturates_instead_of_wrapping() {
        let jitter = Duration::from_millis(500);
        assert_eq!(stagger_offset(jitter, 0), Duration::ZERO);
        assert_eq!(stagger_offset(jitter, 3), Duration::from_millis(1500));
        assert_eq!(
            stagger_offset(jitter, usize::MAX),
            jitter.saturating_mul(u32::MAX)
        );
        #[cfg(target_pointer_width = "64")]
        assert_eq!(
            stagger_offset(jitter, 1 << 32),
            jitter.saturating_mul(u32::MAX)
        );
    }

    async fn record(started: Instant, id: String) -> (String, Duration) {
        let at = started.elapsed();
        tokio::time::sleep(Duration::from_secs(1)).await;
        (id, at)
    }

    #[tokio::test(start_paused = true)]
    async fn parallel_starts_together() {
        let started = Instant::now();
        let out = StartupPolicy::Parallel
            .run(ids(), |id| record(started, id))
            .await;
        assert!(out.iter().all(|(_, at)| at.is_zero()));
        assert_eq!(started.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn staggered_offsets_each_launch() {
        let started = Instant::now();
        let out = StartupPolicy::Staggered { jitter_ms: 200 }
            .run(ids(), |id| record(started, id))
            .await;
        let offsets: Vec<u128> = out.iter().map(|(_, at)| at.as_millis()).collect();
        assert_eq!(offsets, vec![0, 200, 400]);
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_waits_for_each_and_the_delay() {
        let started = Instant::now();
        let out = StartupPolicy::Sequential { delay_ms: 2000 }
            .run(ids(), |id| record(started, id))
            .await;
        let offsets: Vec<u64> = out.iter().map(|(_, at)| at.as_secs()).collect();
        assert_eq!(offsets, vec![0, 3, 6]);
        assert_eq!(out[2].0, "c");
    }

    #[test]
    fn parses_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            startup: StartupPolicy,
        }
        let parsed: Wrapper =
            toml::from_str("[startup]\nmode = \"staggered\"\njitter_ms = 250").expect("parse");
        assert_eq!(parsed.startup, StartupPolicy::Staggered { jitter_ms: 250 });
        let parsed: Wrapper = toml::from_str("[startup]\nmode = \"parallel\"").expect("parse");
        assert_eq!(parsed.startup, StartupPolicy::Parallel);
    }
}
