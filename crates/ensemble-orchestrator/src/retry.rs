//! Bounded retry for avatar attachment.

use ensemble_voice::{AvatarRenderingService, AvatarSession, AvatarStartRequest, VoiceError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// What a session does once avatar attachment has exhausted its retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvatarFailurePolicy {
    /// Stay active with audio output only.
    #[default]
    Degrade,
    /// Tear the session down and report the failure.
    Fail,
}

/// Fixed-count, fixed-delay retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(3))
    }
}

impl RetryPolicy {
    /// `attempts` is clamped to at least one.
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

/// A started avatar and how many attempts failed before it came up.
pub struct Attached {
    pub session: Box<dyn AvatarSession>,
    pub failed_attempts: u32,
}

/// Avatar attachment gave up.
#[derive(Debug)]
pub struct AttachError {
    /// Attempts made, all of them failed.
    pub attempts: u32,
    pub last_error: VoiceError,
}

/// Starts an avatar, retrying transient failures under `policy`.
///
/// Non-transient failures (a rejected request, a bad token) end the loop
/// at once since repeating the same request cannot succeed.
pub async fn attach_with_retry(
    service: &dyn AvatarRenderingService,
    request: &AvatarStartRequest,
    policy: RetryPolicy,
) -> Result<Attached, AttachError> {
    let mut attempt = 1;
    loop {
        match service.start(request).await {
            Ok(session) => {
                info!(
                    identity = %request.agent_identity,
                    avatar_identity = %request.avatar_identity,
                    attempt,
                    "avatar session started"
                );
                return Ok(Attached {
                    session,
                    failed_attempts: attempt - 1,
                });
            }
            Err(e) => {
                warn!(
                    identity = %request.agent_identity,
                    attempt,
                    max_attempts = policy.attempts,
                    error = %e,
                    "avatar attempt failed"
                );
                if !e.is_transient() || attempt >= policy.attempts {
                    return Err(AttachError {
                        attempts: attempt,
                        last_error: e,
                    });
                }
            }
        }
        tokio::time::sleep(policy.delay).await;
        attempt += 1;
    }
}
