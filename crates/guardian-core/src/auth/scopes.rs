//! Minimal scope derivation for remediation actions.

use std::collections::BTreeSet;

use crate::domain::{RemediationAction, Scope, Strategy};

/// Scopes implied by the strategy itself, independent of the steps.
///
/// The match is exhaustive: adding a strategy fails to compile until it is
/// mapped here.
fn strategy_scopes(strategy: Strategy) -> &'static [&'static str] {
    match strategy {
        Strategy::DataCorrection => &["audit.write:correction_log"],
        Strategy::RecordCleanup => &["audit.write:retention_log"],
        Strategy::CacheRefresh => &[],
        Strategy::ConfigChange => &["config.read:snapshot"],
        Strategy::Reindex => &["search.write:index"],
        Strategy::CodeChange => &["repo.propose:pull_request"],
    }
}

/// Derive the minimal, sorted and deduplicated scope list for an action.
///
/// Each step contributes `{domain}.{verb}:{resource}` for its target. There
/// is no catch-all scope.
pub fn determine_scopes_for_action(action: &RemediationAction) -> Vec<String> {
    let mut scopes: BTreeSet<String> = strategy_scopes(action.strategy)
        .iter()
        .map(|s| (*s).to_string())
        .collect();

    for step in &action.steps {
        let target = step.action.target();
        let scope = Scope::new(
            target.scope_domain(),
            step.action.verb().as_str(),
            target.resource(),
        );
        scopes.insert(scope.as_str().to_string());
    }

    scopes.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ActionStep, StepAction, StepTarget};
    use std::collections::BTreeMap;

    fn step(action: StepAction) -> ActionStep {
        ActionStep {
            description: "step".into(),
            action,
            rollback: None,
        }
    }

    fn obs() -> StepTarget {
        StepTarget::Fhir {
            resource_type: "Observation".into(),
        }
    }

    #[test]
    fn test_read_then_update() {
        let action = RemediationAction {
            id: "a1".into(),
            issue_id: "i1".into(),
            strategy: Strategy::DataCorrection,
            steps: vec![
                step(StepAction::ReadRecord {
                    target: obs(),
                    id: Some("o-1".into()),
                }),
                step(StepAction::UpdateRecord {
                    target: obs(),
                    id: "o-1".into(),
                    changes: BTreeMap::new(),
                }),
                step(StepAction::ReadRecord {
                    target: obs(),
                    id: Some("o-2".into()),
                }),
            ],
        };
        assert_eq!(
            determine_scopes_for_action(&action),
            vec![
                "audit.write:correction_log",
                "fhir.read:Observation",
                "fhir.write:Observation",
            ]
        );
    }

    #[test]
    fn test_cache_refresh_has_only_step_scopes() {
        let action = RemediationAction {
            id: "a2".into(),
            issue_id: "i2".into(),
            strategy: Strategy::CacheRefresh,
            steps: vec![step(StepAction::InvalidateCache {
                target: StepTarget::Cache {
                    namespace: "feature_flags".into(),
                },
                key: "all".into(),
            })],
        };
        assert_eq!(
            determine_scopes_for_action(&action),
            vec!["cache.delete:feature_flags"]
        );
    }

    #[test]
    fn test_code_change_requires_proposal_scope() {
        let action = RemediationAction {
            id: "a3".into(),
            issue_id: "i3".into(),
            strategy: Strategy::CodeChange,
            steps: vec![step(StepAction::EditFile {
                target: StepTarget::File {
                    path: "src/config.toml".into(),
                },
                summary: "bump timeout".into(),
            })],
        };
        let scopes = determine_scopes_for_action(&action);
        assert!(scopes.contains(&"repo.propose:pull_request".to_string()));
        assert!(scopes.contains(&"repo.write:src/config.toml".to_string()));
    }

    #[test]
    fn test_deterministic_and_never_wildcard() {
        let action = RemediationAction {
            id: "a4".into(),
            issue_id: "i4".into(),
            strategy: Strategy::Reindex,
            steps: vec![step(StepAction::QueryRecords {
                target: StepTarget::Table {
                    name: "observations".into(),
                },
                filter: BTreeMap::new(),
                limit: Some(10),
            })],
        };
        let first = determine_scopes_for_action(&action);
        assert_eq!(first, determine_scopes_for_action(&action));
        assert!(first.iter().all(|s| !s.contains('*')));
    }
}
