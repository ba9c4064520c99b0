// Safety gate: nothing behind a pending safety check runs without an explicit yes.
use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent_engine::event_bus::{EventBus, OperatorEvent, RunEvent};
use crate::agent_engine::state::PendingSafetyCheck;
use crate::config::{SafetyConfig, MAX_CONFIRMATION_TIMEOUT_SECS};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AuthorizationResult {
    AllAuthorized,
    Rejected { reason: String },
    /// Checks still waiting for a human decision.
    Pending { checks: Vec<PendingSafetyCheck> },
}

/// Stateless per proposal: every call starts from deny-until-confirmed.
pub struct SafetyGate {
    auto_approve: HashSet<String>,
    always_reject: HashSet<String>,
    confirmation_timeout: Duration,
}

impl SafetyGate {
    pub fn new(policy: &SafetyConfig, confirmation_timeout: Duration) -> Self {
        Self {
            auto_approve: policy.auto_approve_codes.iter().cloned().collect(),
            always_reject: policy.always_reject_codes.iter().cloned().collect(),
            confirmation_timeout: confirmation_timeout.min(Duration::from_secs(MAX_CONFIRMATION_TIMEOUT_SECS)),
        }
    }

    /// Applies the configured policy. Anything not whitelisted is left pending.
    pub fn authorize(&self, checks: &[PendingSafetyCheck]) -> AuthorizationResult {
        if let Some(check) = checks.iter().find(|c| self.always_reject.contains(&c.code)) {
            tracing::warn!(check_id = %check.id, code = %check.code, "safety check rejected by policy");
            return AuthorizationResult::Rejected {
                reason: format!("{} ({}) is blocked by policy", check.id, check.code),
            };
        }

        let pending: Vec<PendingSafetyCheck> = checks
            .iter()
            .filter(|c| !self.auto_approve.contains(&c.code))
            .cloned()
            .collect();

        for check in checks.iter().filter(|c| self.auto_approve.contains(&c.code)) {
            tracing::info!(check_id = %check.id, code = %check.code, "safety check auto-approved by policy");
        }

        if pending.is_empty() {
            AuthorizationResult::AllAuthorized
        } else {
            AuthorizationResult::Pending { checks: pending }
        }
    }

    /// Blocks until every pending check is approved, any is denied, or the
    /// confirmation timeout elapses (unresolved checks count as denied).
    pub async fn await_confirmation(
        &self,
        pending: Vec<PendingSafetyCheck>,
        bus: &mut EventBus,
    ) -> AuthorizationResult {
        let dropped = bus.drain_stale_operator_events();
        if dropped > 0 {
            tracing::debug!(dropped, "discarded confirmations that predate this proposal");
        }

        let _ = bus.send(RunEvent::ConfirmationRequired {
            checks: pending.clone(),
            timeout_secs: self.confirmation_timeout.as_secs(),
        });

        let mut unresolved: HashSet<String> = pending.iter().map(|c| c.id.clone()).collect();
        let now = tokio::time::Instant::now();
        let deadline = now
            .checked_add(self.confirmation_timeout)
            .unwrap_or_else(|| now + Duration::from_secs(MAX_CONFIRMATION_TIMEOUT_SECS));

        while !unresolved.is_empty() {
            let event = match tokio::time::timeout_at(deadline, bus.recv_operator()).await {
                Ok(Some(event)) => event,
                Ok(None) => {
                    return AuthorizationResult::Rejected {
                        reason: "operator channel closed before confirmation".into(),
                    };
                }
                Err(_) => {
                    tracing::warn!(unresolved = unresolved.len(), "safety confirmation timed out");
                    return AuthorizationResult::Rejected {
                        reason: format!(
                            "no operator confirmation within {}s",
                            self.confirmation_timeout.as_secs()
                        ),
                    };
                }
            };

            match event {
                OperatorEvent::Confirm { check_id, approved } => {
                    if !unresolved.contains(&check_id) {
                        tracing::debug!(check_id = %check_id, "confirmation for unknown check ignored");
                        continue;
                    }
                    if !approved {
                        tracing::warn!(check_id = %check_id, "operator denied safety check");
                        return AuthorizationResult::Rejected {
                            reason: format!("operator denied {check_id}"),
                        };
                    }
                    tracing::info!(check_id = %check_id, "operator approved safety check");
                    unresolved.remove(&check_id);
                }
            }
        }

        AuthorizationResult::AllAuthorized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(id: &str, code: &str) -> PendingSafetyCheck {
        PendingSafetyCheck {
            id: id.into(),
            code: code.into(),
            message: "please confirm".into(),
        }
    }

    fn gate(auto: &[&str], reject: &[&str], timeout_ms: u64) -> SafetyGate {
        SafetyGate::new(
            &SafetyConfig {
                auto_approve_codes: auto.iter().map(|s| s.to_string()).collect(),
                always_reject_codes: reject.iter().map(|s| s.to_string()).collect(),
            },
            Duration::from_millis(timeout_ms),
        )
    }

    #[test]
    fn no_checks_means_authorized() {
        assert_eq!(gate(&[], &[], 10).authorize(&[]), AuthorizationResult::AllAuthorized);
    }

    #[test]
    fn default_posture_is_pending() {
        let checks = vec![check("sc-1", "sensitive_domain")];
        assert_eq!(
            gate(&[], &[], 10).authorize(&checks),
            AuthorizationResult::Pending { checks }
        );
    }

    #[test]
    fn whitelist_and_blocklist_apply() {
        let g = gate(&["irrelevant_domain"], &["malicious_instructions"], 10);
        assert_eq!(
            g.authorize(&[check("a", "irrelevant_domain")]),
            AuthorizationResult::AllAuthorized
        );
        assert!(matches!(
            g.authorize(&[check("a", "irrelevant_domain"), check("b", "malicious_instructions")]),
            AuthorizationResult::Rejected { .. }
        ));
        assert_eq!(
            g.authorize(&[check("a", "irrelevant_domain"), check("c", "sensitive_domain")]),
            AuthorizationResult::Pending {
                checks: vec![check("c", "sensitive_domain")]
            }
        );
    }

    #[tokio::test]
    async fn all_approvals_authorize() {
        let mut bus = EventBus::new();
        let tx = bus.operator_sender();
        let pending = vec![check("sc-1", "x"), check("sc-2", "y")];
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            for id in ["sc-2", "unrelated", "sc-1"] {
                tx.send(OperatorEvent::Confirm {
                    check_id: id.into(),
                    approved: true,
                })
                .await
                .unwrap();
            }
        });
        let result = gate(&[], &[], 2_000).await_confirmation(pending, &mut bus).await;
        assert_eq!(result, AuthorizationResult::AllAuthorized);
    }

    #[tokio::test]
    async fn huge_timeout_is_capped_instead_of_overflowing() {
        let g = SafetyGate::new(&SafetyConfig::default(), Duration::MAX);
        let mut bus = EventBus::new();
        let mut events = bus.subscribe();
        let tx = bus.operator_sender();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            tx.send(OperatorEvent::Confirm {
                check_id: "sc-1".into(),
                approved: true,
            })
            .await
            .unwrap();
        });

        let result = g.await_confirmation(vec![check("sc-1", "x")], &mut bus).await;
        assert_eq!(result, AuthorizationResult::AllAuthorized);
        match events.try_recv() {
            Ok(RunEvent::ConfirmationRequired { timeout_secs, .. }) => {
                assert_eq!(timeout_secs, MAX_CONFIRMATION_TIMEOUT_SECS)
            }
            other => panic!("expected confirmation request, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn one_denial_rejects() {
        let mut bus = EventBus::new();
        let tx = bus.operator_sender();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            tx.send(OperatorEvent::Confirm {
                check_id: "sc-1".into(),
                approved: false,
            })
            .await
            .unwrap();
        });
        let result = gate(&[], &[], 2_000)
            .await_confirmation(vec![check("sc-1", "x")], &mut bus)
            .await;
        assert!(matches!(result, AuthorizationResult::Rejected { .. }));
    }

    #[tokio::test]
    async fn silence_times_out_as_rejected() {
        let mut bus = EventBus::new();
        let result = gate(&[], &[], 30)
            .await_confirmation(vec![check("sc-1", "x")], &mut bus)
            .await;
        match result {
            AuthorizationResult::Rejected { reason } => assert!(reason.contains("no operator confirmation")),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn earlier_approvals_do_not_carry_forward() {
        let mut bus = EventBus::new();
        bus.operator_sender()
            .send(OperatorEvent::Confirm {
                check_id: "sc-1".into(),
                approved: true,
            })
            .await
            .unwrap();
        let result = gate(&[], &[], 30)
            .await_confirmation(vec![check("sc-1", "x")], &mut bus)
            .await;
        assert!(matches!(result, AuthorizationResult::Rejected { .. }));
    }
}
