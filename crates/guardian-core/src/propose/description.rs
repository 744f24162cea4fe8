//! Pull-request title and body for a proposal.

use std::fmt::Write as _;

use crate::domain::{Issue, RemediationAction};

use super::proposal::FileChange;

pub fn pr_title(issue: &Issue) -> String {
    format!("[guardian] {}: {}", issue.category, issue.title)
}

/// Markdown body: issue summary, step plan, rollback plan, affected
/// resources and a review checklist.
pub fn render_description(
    proposal_id: &str,
    issue: &Issue,
    action: &RemediationAction,
    changes: &[FileChange],
) -> String {
    let mut out = String::new();

    // Writing to a String cannot fail.
    let _ = writeln!(out, "## Summary\n");
    let _ = writeln!(out, "**Issue:** {} ({})", issue.title, issue.id);
    let _ = writeln!(
        out,
        "**Category:** {} · **Severity:** {} · **Strategy:** {}",
        issue.category, issue.severity, action.strategy
    );
    if !issue.description.trim().is_empty() {
        let _ = writeln!(out, "\n{}", issue.description.trim());
    }

    let _ = writeln!(out, "\n## Remediation plan\n");
    if action.steps.is_empty() {
        let _ = writeln!(out, "_No runtime steps; file changes only._");
    }
    for (i, step) in action.steps.iter().enumerate() {
        let _ = writeln!(
            out,
            "{}. {} (`{}` on `{}`)",
            i + 1,
            step.description,
            step.action.verb().as_str(),
            step.action.target()
        );
    }

    let _ = writeln!(out, "\n### File changes\n");
    for change in changes {
        let _ = writeln!(
            out,
            "- `{}` {}: {}",
            change.path,
            change.kind.as_str(),
            change.reason
        );
    }

    let _ = writeln!(out, "\n## Rollback plan\n");
    let _ = writeln!(
        out,
        "Close this pull request without merging; nothing reaches the base branch until it merges."
    );
    for (i, step) in action.steps.iter().enumerate() {
        if let Some(rollback) = &step.rollback {
            let _ = writeln!(out, "- Step {}: {}", i + 1, rollback);
        }
    }

    let _ = writeln!(out, "\n## Affected resources\n");
    let mut resources: Vec<String> = issue.affected_resources.clone();
    for target in action.affected_targets() {
        let entry = target.to_string();
        if !resources.contains(&entry) {
            resources.push(entry);
        }
    }
    for change in changes {
        let entry = format!("repo:{}", change.path);
        if !resources.contains(&entry) {
            resources.push(entry);
        }
    }
    for resource in &resources {
        let _ = writeln!(out, "- `{resource}`");
    }

    let _ = writeln!(out, "\n## Review checklist\n");
    for item in [
        "Changes match the remediation plan above",
        "No credentials, secrets or patient data in the diff",
        "Tests cover the changed behavior and pass",
        "Rollback plan is adequate for the affected resources",
    ] {
        let _ = writeln!(out, "- [ ] {item}");
    }

    let _ = write!(out, "\n---\nGenerated by Guardian for proposal `{proposal_id}`.\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ActionStep, IssueCategory, Severity, StepAction, StepTarget, Strategy};

    #[test]
    fn test_description_sections() {
        let issue = Issue {
            id: "ISS-7".into(),
            category: IssueCategory::Performance,
            severity: Severity::High,
            title: "slow observation search".into(),
            description: "p95 above 2s".into(),
            affected_resources: vec!["fhir:Observation".into()],
        };
        let action = RemediationAction {
            id: "act-1".into(),
            issue_id: "ISS-7".into(),
            strategy: Strategy::CodeChange,
            steps: vec![ActionStep {
                description: "Add index hint".into(),
                action: StepAction::EditFile {
                    target: StepTarget::File {
                        path: "db/search.sql".into(),
                    },
                    summary: "hint".into(),
                },
                rollback: Some("Revert the hint".into()),
            }],
        };
        let changes = vec![FileChange::update("db/search.sql", "select 1", "add index hint")];
        let body = render_description("p-1", &issue, &action, &changes);

        for heading in [
            "## Summary",
            "## Remediation plan",
            "## Rollback plan",
            "## Affected resources",
            "## Review checklist",
        ] {
            assert!(body.contains(heading), "missing {heading}");
        }
        assert!(body.contains("1. Add index hint (`write` on `repo:db/search.sql`)"));
        assert!(body.contains("Step 1: Revert the hint"));
        assert!(body.contains("- `fhir:Observation`"));
        // The step target and the changed file name the same resource.
        assert_eq!(body.matches("- `repo:db/search.sql`").count(), 1);
        assert_eq!(
            pr_title(&issue),
            "[guardian] performance: slow observation search"
        );
    }
}
