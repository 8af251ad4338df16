use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::CheckConfig;

use super::status::StatusSource;
use super::verdict::{Verdict, READ_ONLY_UNKNOWN_MESSAGE};

/// wsrep_local_state: node is synced with the cluster
pub const STATE_SYNCED: i64 = 4;
/// wsrep_local_state: node is a donor (or desynced)
pub const STATE_DONOR: i64 = 2;

/// Turns override sentinels and node status into a verdict
///
/// Holds no state between evaluations; every call reads the sentinels and
/// the node afresh.
pub struct HealthEvaluator {
    policy: CheckConfig,
    source: Arc<dyn StatusSource>,
}

impl HealthEvaluator {
    pub fn new(policy: CheckConfig, source: Arc<dyn StatusSource>) -> Self {
        Self { policy, source }
    }

    /// Evaluate node health
    ///
    /// Order is fixed: force-up, force-fail, replication state, read_only.
    /// Overrides are consulted before any database I/O so an operator can
    /// force a verdict while the node is unreachable.
    pub async fn evaluate(&self) -> Verdict {
        let verdict = self.run().await;
        debug!(verdict = verdict.label(), "Evaluated node health");
        verdict
    }

    async fn run(&self) -> Verdict {
        if sentinel_exists(&self.policy.force_up_file).await {
            return Verdict::ForcedUp;
        }

        if sentinel_exists(&self.policy.force_fail_file).await {
            return Verdict::ForcedDown;
        }

        let mut probe = match self.source.open().await {
            Ok(probe) => probe,
            Err(e) => {
                warn!(error = %e, "Unable to reach node");
                return Verdict::Error(e.to_string());
            }
        };

        let state = match probe.local_state().await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "Unable to read wsrep_local_state");
                return Verdict::Error(e.to_string());
            }
        };

        if state == STATE_DONOR && self.policy.available_when_donor {
            return Verdict::Donor;
        } else if state != STATE_SYNCED {
            debug!(wsrep_local_state = state, "Node not synced");
            return Verdict::Unavailable;
        }

        if !self.policy.available_when_readonly {
            match probe.read_only().await {
                Ok(read_only) if read_only == "ON" => return Verdict::ReadOnly,
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "Unable to read read_only");
                    return Verdict::Error(READ_ONLY_UNKNOWN_MESSAGE.to_string());
                }
            }
        }

        Verdict::Healthy
    }
}

/// Existence test only; contents are never read
async fn sentinel_exists(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok()
}
