use std::time::Duration;

use shared::{domain::Identity, error::ErrorCode};
use thiserror::Error;
use tracing::info;

/// Minimum perceived latency of a verification attempt. Purely cosmetic,
/// carried over from the original gate.
const VERIFY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum GateError {
    #[error("wrong secret for {0}")]
    WrongSecret(Identity),
    #[error("session store failed: {source}")]
    Store { source: anyhow::Error },
}

impl GateError {
    pub fn code(&self) -> ErrorCode {
        match self {
            GateError::WrongSecret(_) => ErrorCode::WrongSecret,
            GateError::Store { .. } => ErrorCode::WriteFailed,
        }
    }
}

/// Fixed plaintext secret for each participant, compared case-insensitively.
/// This gate is a UX speed bump for a private two-person chat, not an
/// authentication boundary; hashing or lockout would change observable
/// behavior without adding real security.
fn expected_secret(identity: Identity) -> &'static str {
    match identity {
        Identity::He => "aadi",
        Identity::She => "baby",
    }
}

pub async fn verify_secret(identity: Identity, secret: &str) -> Result<(), GateError> {
    tokio::time::sleep(VERIFY_DELAY).await;
    if secret.eq_ignore_ascii_case(expected_secret(identity)) {
        info!("gate: secret accepted for {identity}");
        Ok(())
    } else {
        Err(GateError::WrongSecret(identity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn accepts_correct_secret_case_insensitively() {
        verify_secret(Identity::He, "aadi").await.expect("exact");
        verify_secret(Identity::He, "AADI").await.expect("uppercase");
        verify_secret(Identity::She, "Baby").await.expect("mixed case");
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_wrong_secret() {
        let err = verify_secret(Identity::He, "nope")
            .await
            .expect_err("should reject");
        assert!(matches!(err, GateError::WrongSecret(Identity::He)));
    }

    #[tokio::test(start_paused = true)]
    async fn secrets_are_per_identity() {
        let err = verify_secret(Identity::He, "baby")
            .await
            .expect_err("peer secret must not unlock");
        assert!(matches!(err, GateError::WrongSecret(Identity::He)));
    }
}
