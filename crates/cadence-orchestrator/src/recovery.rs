//! Failure recovery policy for wave phases and chain links
//!
//! A failure is classified by whether it is recoverable and how badly it
//! impacts accumulated state; the policy maps that, together with the
//! strategy's failure handling, to a recovery action.

use crate::phases::FailureHandling;
use cadence_core::{CadenceError, Severity};
use serde::{Deserialize, Serialize};

/// What to do about a failed chain link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainRecovery {
    /// Re-execute the link once
    Retry,
    /// Mark the link skipped and continue with the next persona
    Skip,
    /// Restore pre-link accumulated context, then stop
    Rollback,
    /// Stop immediately
    Abort,
}

/// What to do about a failed wave phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaveRecovery {
    /// Re-execute the phase once
    Retry,
    /// Record the failed phase and move to the next one
    Skip,
    /// Restore the last good checkpoint, then stop
    Fallback,
    /// Stop immediately, no restoration
    Abort,
}

/// Recoverability and context impact of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureProfile {
    pub recoverable: bool,
    pub context_impact: Severity,
}

/// Classify an engine error for recovery purposes.
///
/// Agent failures are transient and worth retrying; resource failures are
/// recoverable but heavier; validation failures indicate a caller bug and
/// are final.
pub fn classify_failure(error: &CadenceError) -> FailureProfile {
    match error {
        CadenceError::Agent(_) | CadenceError::AgentNotFound(_) => FailureProfile {
            recoverable: true,
            context_impact: Severity::Medium,
        },
        CadenceError::Resource(_) => FailureProfile {
            recoverable: true,
            context_impact: Severity::High,
        },
        CadenceError::Validation(_) | CadenceError::DuplicateId(_) => FailureProfile {
            recoverable: false,
            context_impact: Severity::Critical,
        },
        _ => FailureProfile {
            recoverable: false,
            context_impact: Severity::High,
        },
    }
}

/// Classify a failed wave phase.
///
/// Only a timeout is transient enough to justify re-running a whole
/// phase; anything else is final for that phase.
pub fn classify_phase_failure(timed_out: bool) -> FailureProfile {
    FailureProfile {
        recoverable: timed_out,
        context_impact: if timed_out {
            Severity::Medium
        } else {
            Severity::High
        },
    }
}

/// Pick the wave recovery action from a failure profile and the
/// strategy's failure handling.
///
/// Continue strategies skip the failed phase; retry is reserved for
/// recoverable (timeout-class) failures, with unrecoverable failures
/// falling back to the last checkpoint instead; abort strategies stop
/// without restoration.
pub fn choose_wave_recovery(profile: FailureProfile, handling: FailureHandling) -> WaveRecovery {
    match handling {
        FailureHandling::Continue => WaveRecovery::Skip,
        FailureHandling::Retry if profile.recoverable => WaveRecovery::Retry,
        FailureHandling::Retry => WaveRecovery::Fallback,
        FailureHandling::Abort => WaveRecovery::Abort,
    }
}

/// Pick a recovery action from a failure profile.
///
/// Critical context impact always rolls back, whatever the
/// recoverability; unrecoverable failures abort; light recoverable
/// failures are skipped, the rest retried.
pub fn choose_chain_recovery(profile: FailureProfile) -> ChainRecovery {
    if profile.context_impact == Severity::Critical {
        return ChainRecovery::Rollback;
    }
    if !profile.recoverable {
        return ChainRecovery::Abort;
    }
    match profile.context_impact {
        Severity::Low => ChainRecovery::Skip,
        _ => ChainRecovery::Retry,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_failures_retry() {
        let profile = classify_failure(&CadenceError::Agent("persona offline".into()));
        assert_eq!(choose_chain_recovery(profile), ChainRecovery::Retry);
    }

    #[test]
    fn test_validation_failures_roll_back() {
        let profile = classify_failure(&CadenceError::Validation("bad input".into()));
        assert_eq!(choose_chain_recovery(profile), ChainRecovery::Rollback);
    }

    #[test]
    fn test_unrecoverable_non_critical_aborts() {
        let profile = FailureProfile {
            recoverable: false,
            context_impact: Severity::High,
        };
        assert_eq!(choose_chain_recovery(profile), ChainRecovery::Abort);
    }

    #[test]
    fn test_light_recoverable_failures_skip() {
        let profile = FailureProfile {
            recoverable: true,
            context_impact: Severity::Low,
        };
        assert_eq!(choose_chain_recovery(profile), ChainRecovery::Skip);
    }

    #[test]
    fn test_timed_out_phase_retries_under_retry_handling() {
        let profile = classify_phase_failure(true);
        assert!(profile.recoverable);
        assert_eq!(
            choose_wave_recovery(profile, FailureHandling::Retry),
            WaveRecovery::Retry
        );
    }

    #[test]
    fn test_non_timeout_phase_falls_back_under_retry_handling() {
        let profile = classify_phase_failure(false);
        assert!(!profile.recoverable);
        assert_eq!(
            choose_wave_recovery(profile, FailureHandling::Retry),
            WaveRecovery::Fallback
        );
    }

    #[test]
    fn test_continue_handling_always_skips() {
        for timed_out in [true, false] {
            assert_eq!(
                choose_wave_recovery(classify_phase_failure(timed_out), FailureHandling::Continue),
                WaveRecovery::Skip
            );
        }
    }

    #[test]
    fn test_abort_handling_never_retries() {
        assert_eq!(
            choose_wave_recovery(classify_phase_failure(true), FailureHandling::Abort),
            WaveRecovery::Abort
        );
    }
}
