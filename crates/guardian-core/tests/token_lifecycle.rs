//! Token mint / validate / revoke flows across tasks.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};

use guardian_core::audit::{AuditEventKind, AuditSeverity, MemoryAuditSink};
use guardian_core::auth::{KeyManager, MintOptions, TokenAuthenticator, TokenConfig};
use guardian_core::domain::{
    ActionStep, AuthorizationError, Issue, IssueCategory, RemediationAction, Severity, StepAction,
    StepTarget, Strategy,
};
use guardian_core::metrics::Metrics;

fn authenticator() -> (Arc<TokenAuthenticator>, Arc<MemoryAuditSink>, Arc<Metrics>) {
    let audit = Arc::new(MemoryAuditSink::new());
    let metrics = Arc::new(Metrics::new());
    let auth = Arc::new(TokenAuthenticator::new(
        KeyManager::generate(),
        TokenConfig::default(),
        audit.clone(),
        metrics.clone(),
    ));
    (auth, audit, metrics)
}

fn issue() -> Issue {
    Issue {
        id: "ISS-100".into(),
        category: IssueCategory::DataQuality,
        severity: Severity::High,
        title: "observations missing units".into(),
        description: "unit field empty on 312 rows".into(),
        affected_resources: vec!["fhir:Observation".into()],
    }
}

fn action(id: &str) -> RemediationAction {
    RemediationAction {
        id: id.into(),
        issue_id: "ISS-100".into(),
        strategy: Strategy::DataCorrection,
        steps: vec![ActionStep {
            description: "read observation".into(),
            action: StepAction::ReadRecord {
                target: StepTarget::Fhir {
                    resource_type: "Observation".into(),
                },
                id: Some("obs-1".into()),
            },
            rollback: None,
        }],
    }
}

fn scopes(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[test]
fn first_validation_succeeds_then_replays() {
    let (auth, audit, metrics) = authenticator();
    let read = scopes(&["fhir.read:Observation"]);
    let issued = auth
        .mint_token(&action("a-1"), &issue(), &read, MintOptions::default())
        .unwrap();

    let first = auth.validate_token(&issued.token, &read);
    assert!(first.valid, "{:?}", first.errors);
    assert_eq!(first.claims.as_ref().unwrap().jti, issued.jti());

    for _ in 0..3 {
        let again = auth.validate_token(&issued.token, &read);
        assert!(!again.valid);
        assert!(again.replayed);
    }

    let replays = audit.events_of(AuditEventKind::TokenReplayed);
    assert_eq!(replays.len(), 3);
    assert!(replays.iter().all(|e| e.severity >= AuditSeverity::Warn));
    assert_eq!(metrics.snapshot().replays_blocked, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_validation_has_exactly_one_winner() {
    let (auth, _, _) = authenticator();
    let read = scopes(&["fhir.read:Observation"]);
    let token = auth
        .mint_token(&action("a-race"), &issue(), &read, MintOptions::default())
        .unwrap()
        .token;

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let auth = auth.clone();
            let token = token.clone();
            let read = read.clone();
            tokio::spawn(async move { auth.validate_token(&token, &read) })
        })
        .collect();

    let results = futures::future::join_all(handles).await;
    let outcomes: Vec<_> = results.into_iter().map(|r| r.unwrap()).collect();

    assert_eq!(outcomes.iter().filter(|v| v.valid).count(), 1);
    assert_eq!(outcomes.iter().filter(|v| v.replayed).count(), 31);
}

#[test]
fn expired_after_ttl() {
    let (auth, _, _) = authenticator();
    let read = scopes(&["fhir.read:Observation"]);
    let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
    let issued = auth
        .mint_token_at(&action("a-exp"), &issue(), &read, MintOptions::default(), t0)
        .unwrap();

    let ttl = issued.claims.ttl_secs();
    assert!((120..=300).contains(&ttl));

    let late = auth.validate_token_at(&issued.token, &read, t0 + Duration::seconds(ttl + 1));
    assert!(!late.valid);
    assert!(late.expired);
    assert!(matches!(
        late.into_result(),
        Err(AuthorizationError::Expired { .. })
    ));
}

#[test]
fn session_revocation_covers_every_token() {
    let (auth, audit, _) = authenticator();
    let read = scopes(&["fhir.read:Observation"]);
    let session = MintOptions::default().with_session("sess-7").with_user("agent-1");

    let tokens: Vec<String> = (0..3)
        .map(|i| {
            auth.mint_token(&action(&format!("a-s{i}")), &issue(), &read, session.clone())
                .unwrap()
                .token
        })
        .collect();
    let outsider = auth
        .mint_token(&action("a-other"), &issue(), &read, MintOptions::default())
        .unwrap()
        .token;

    assert_eq!(auth.revoke_session("sess-7"), 3);
    for token in &tokens {
        let v = auth.validate_token(token, &read);
        assert!(v.revoked, "{:?}", v.errors);
        assert!(!v.valid);
    }
    assert!(auth.validate_token(&outsider, &read).valid);
    assert_eq!(audit.events_of(AuditEventKind::SessionRevoked).len(), 1);
}

#[test]
fn insufficient_scopes_are_itemized() {
    let (auth, _, _) = authenticator();
    let token = auth
        .mint_token(
            &action("a-scope"),
            &issue(),
            &scopes(&["fhir.read:Observation"]),
            MintOptions::default(),
        )
        .unwrap()
        .token;

    let v = auth.validate_token(
        &token,
        &scopes(&["fhir.read:Observation", "fhir.write:Observation"]),
    );
    assert!(!v.valid);
    assert!(v.insufficient_scopes);
    assert_eq!(v.missing_scopes, scopes(&["fhir.write:Observation"]));
}

#[test]
fn rotation_publishes_both_keys() {
    let (auth, _, _) = authenticator();
    let read = scopes(&["fhir.read:Observation"]);
    let before = auth
        .mint_token(&action("a-rot"), &issue(), &read, MintOptions::default())
        .unwrap();
    let old_kid = auth.active_kid();

    let new_kid = auth.rotate_keys();
    assert_ne!(old_kid, new_kid);

    let jwks = auth.jwks();
    let kids: Vec<&str> = jwks.keys.iter().map(|k| k.kid.as_str()).collect();
    assert!(kids.contains(&old_kid.as_str()));
    assert!(kids.contains(&new_kid.as_str()));

    assert!(auth.validate_token(&before.token, &read).valid);
}

#[test]
fn tampered_token_is_rejected() {
    let (auth, audit, _) = authenticator();
    let read = scopes(&["fhir.read:Observation"]);
    let token = auth
        .mint_token(&action("a-tamper"), &issue(), &read, MintOptions::default())
        .unwrap()
        .token;

    let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();
    let sig = parts[2].clone();
    let flipped = if sig.starts_with('A') { "B" } else { "A" };
    parts[2] = format!("{flipped}{}", &sig[1..]);
    let forged = parts.join(".");

    let v = auth.validate_token(&forged, &read);
    assert!(!v.valid);
    assert!(matches!(
        v.into_result(),
        Err(AuthorizationError::InvalidSignature(_))
    ));
    assert!(!audit.events_of(AuditEventKind::TokenRejected).is_empty());
}
