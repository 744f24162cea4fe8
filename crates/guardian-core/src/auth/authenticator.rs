//! Per-action token issuance and validation.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditEventKind, AuditSink};
use crate::domain::error::AuthorizationError;
use crate::domain::{Issue, RemediationAction, Scope};
use crate::metrics::Metrics;
use crate::obs;

use super::jti::{ConsumeOutcome, JtiStore};
use super::keys::{JwkSet, KeyManager};
use super::token::{self, ActionContext, TokenClaims};

pub const MIN_TTL_SECS: i64 = 120;
pub const MAX_TTL_SECS: i64 = 300;
pub const DEFAULT_TTL_SECS: i64 = 180;
pub const DEFAULT_REFRESH_RATIO: f64 = 0.8;

/// Token issuance settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub issuer: String,
    /// Requested lifetime; clamped to `[MIN_TTL_SECS, MAX_TTL_SECS]`.
    pub ttl_secs: i64,
    /// Fraction of the lifetime after which a token should be refreshed.
    pub refresh_ratio: f64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            issuer: "guardian".into(),
            ttl_secs: DEFAULT_TTL_SECS,
            refresh_ratio: DEFAULT_REFRESH_RATIO,
        }
    }
}

impl TokenConfig {
    pub fn effective_ttl_secs(&self) -> i64 {
        self.ttl_secs.clamp(MIN_TTL_SECS, MAX_TTL_SECS)
    }

    pub fn effective_refresh_ratio(&self) -> f64 {
        if self.refresh_ratio.is_finite() && self.refresh_ratio > 0.0 && self.refresh_ratio <= 1.0 {
            self.refresh_ratio
        } else {
            DEFAULT_REFRESH_RATIO
        }
    }
}

/// Optional principal attributes carried in a token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MintOptions {
    pub tenant: Option<String>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

impl MintOptions {
    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// A signed token together with its claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub claims: TokenClaims,
}

impl IssuedToken {
    pub fn jti(&self) -> &str {
        &self.claims.jti
    }

    pub fn scopes(&self) -> &[String] {
        &self.claims.scopes
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.claims.expires_at()
    }
}

/// Itemized validation outcome.
///
/// `claims` is only populated once the signature and issuer verified.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenValidation {
    pub valid: bool,
    pub expired: bool,
    pub revoked: bool,
    pub replayed: bool,
    pub insufficient_scopes: bool,
    pub missing_scopes: Vec<String>,
    pub claims: Option<TokenClaims>,
    pub errors: Vec<String>,
    rejection: Option<AuthorizationError>,
}

impl TokenValidation {
    fn reject(&mut self, error: AuthorizationError) {
        self.errors.push(error.to_string());
        if self.rejection.is_none() {
            self.rejection = Some(error);
        }
    }

    /// Collapse into a typed result. Replay and revocation take precedence.
    pub fn into_result(self) -> Result<TokenClaims, AuthorizationError> {
        let jti = self
            .claims
            .as_ref()
            .map(|c| c.jti.clone())
            .unwrap_or_default();
        match self {
            Self {
                valid: true,
                claims: Some(claims),
                ..
            } => Ok(claims),
            Self { revoked: true, .. } => Err(AuthorizationError::Revoked { jti }),
            Self { replayed: true, .. } => Err(AuthorizationError::Replayed { jti }),
            Self { expired: true, .. } => Err(AuthorizationError::Expired { jti }),
            Self {
                insufficient_scopes: true,
                missing_scopes,
                ..
            } => Err(AuthorizationError::InsufficientScopes {
                missing: missing_scopes,
            }),
            Self {
                rejection: Some(err),
                ..
            } => Err(err),
            Self { errors, .. } => Err(AuthorizationError::Rejected { reasons: errors }),
        }
    }
}

/// Mints and validates per-action Ed25519 tokens.
pub struct TokenAuthenticator {
    keys: RwLock<KeyManager>,
    jtis: JtiStore,
    cache: Mutex<HashMap<(String, String), IssuedToken>>,
    config: TokenConfig,
    audit: Arc<dyn AuditSink>,
    metrics: Arc<Metrics>,
}

impl TokenAuthenticator {
    pub fn new(
        keys: KeyManager,
        config: TokenConfig,
        audit: Arc<dyn AuditSink>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            keys: RwLock::new(keys),
            jtis: JtiStore::new(),
            cache: Mutex::new(HashMap::new()),
            config,
            audit,
            metrics,
        }
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<(String, String), IssuedToken>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn decode(&self, token: &str) -> Result<TokenClaims, AuthorizationError> {
        let keys = self.keys.read().unwrap_or_else(PoisonError::into_inner);
        token::decode_verified(token, &keys)
    }

    fn sign(&self, claims: &TokenClaims) -> Result<String, AuthorizationError> {
        let keys = self.keys.read().unwrap_or_else(PoisonError::into_inner);
        token::encode(claims, &keys)
    }

    fn is_due_for_refresh(&self, claims: &TokenClaims, now: DateTime<Utc>) -> bool {
        let age = (now.timestamp() - claims.iat) as f64;
        age >= claims.ttl_secs() as f64 * self.config.effective_refresh_ratio()
    }

    // ------------------------------------------------------------------
    // Minting
    // ------------------------------------------------------------------

    pub fn mint_token(
        &self,
        action: &RemediationAction,
        issue: &Issue,
        required_scopes: &[String],
        options: MintOptions,
    ) -> Result<IssuedToken, AuthorizationError> {
        self.mint_token_at(action, issue, required_scopes, options, Utc::now())
    }

    /// Mint (or reuse) a token for `action` at a given clock reading.
    ///
    /// A cached token for the same (action, issue) is handed back only while
    /// it is unconsumed, unrevoked, carries the same scopes and principal,
    /// and is not yet due for refresh.
    pub fn mint_token_at(
        &self,
        action: &RemediationAction,
        issue: &Issue,
        required_scopes: &[String],
        options: MintOptions,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, AuthorizationError> {
        let mut scopes = BTreeSet::new();
        for scope in required_scopes {
            let parsed = Scope::parse(scope)
                .ok_or_else(|| AuthorizationError::Malformed(format!("invalid scope '{scope}'")))?;
            scopes.insert(String::from(parsed));
        }
        let scopes: Vec<String> = scopes.into_iter().collect();

        let key = (action.id.clone(), issue.id.clone());
        let cached = self.cache().get(&key).cloned();
        if let Some(cached) = cached {
            let c = &cached.claims;
            let reusable = c.scopes == scopes
                && c.tenant == options.tenant
                && c.uid == options.user_id
                && c.sid == options.session_id
                && !c.is_expired(now)
                && !self.is_due_for_refresh(c, now)
                && !self.jtis.is_consumed(&c.jti)
                && !self.jtis.is_revoked(&c.jti);
            if reusable {
                tracing::debug!(jti = %c.jti, action_id = %action.id, "reusing cached token");
                return Ok(cached);
            }
        }

        let ttl = self.config.effective_ttl_secs();
        let claims = TokenClaims {
            iss: self.config.issuer.clone(),
            sub: action.id.clone(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(ttl)).timestamp(),
            scopes,
            tenant: options.tenant,
            uid: options.user_id,
            sid: options.session_id,
            ctx: ActionContext {
                issue_id: issue.id.clone(),
                strategy: action.strategy,
                step_count: action.steps.len(),
            },
        };

        let issued = self.issue(claims)?;
        self.cache().insert(key, issued.clone());
        Ok(issued)
    }

    /// Sign claims, index the jti under its session, and record the mint.
    fn issue(&self, claims: TokenClaims) -> Result<IssuedToken, AuthorizationError> {
        let token = self.sign(&claims)?;
        if let Some(sid) = &claims.sid {
            self.jtis.track_session(sid, &claims.jti, claims.exp);
        }

        self.metrics.inc_tokens_minted();
        obs::emit_token_minted(&claims.jti, &claims.sub, claims.scopes.len(), claims.ttl_secs());
        self.audit.record(AuditEvent::new(
            AuditEventKind::TokenMinted,
            &claims.jti,
            json!({
                "sub": claims.sub,
                "scopes": claims.scopes,
                "exp": claims.exp,
                "sid": claims.sid,
                "tenant": claims.tenant,
            }),
        ));

        Ok(IssuedToken { token, claims })
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    pub fn validate_token(&self, token: &str, required_scopes: &[String]) -> TokenValidation {
        self.validate_token_at(token, required_scopes, Utc::now())
    }

    /// Validate and, only when every check passes, consume the jti.
    ///
    /// Structure, signature and issuer are checked before any claim is
    /// trusted. After that every failing check is reported, not just the
    /// first one.
    pub fn validate_token_at(
        &self,
        token: &str,
        required_scopes: &[String],
        now: DateTime<Utc>,
    ) -> TokenValidation {
        let mut v = TokenValidation::default();

        let claims = match self.decode(token) {
            Ok(claims) => claims,
            Err(err) => {
                v.reject(err);
                self.record_rejection(None, &v);
                return v;
            }
        };

        if claims.iss != self.config.issuer {
            v.reject(AuthorizationError::WrongIssuer {
                expected: self.config.issuer.clone(),
                actual: claims.iss,
            });
            self.record_rejection(None, &v);
            return v;
        }

        let jti = claims.jti.clone();
        if claims.is_expired(now) {
            v.expired = true;
            v.reject(AuthorizationError::Expired { jti: jti.clone() });
        }
        if self.jtis.is_revoked(&jti) {
            v.revoked = true;
            v.reject(AuthorizationError::Revoked { jti: jti.clone() });
        }
        if self.jtis.is_consumed(&jti) {
            v.replayed = true;
            v.reject(AuthorizationError::Replayed { jti: jti.clone() });
        }

        let mut missing: Vec<String> = Vec::new();
        for scope in required_scopes {
            if !claims.has_scope(scope) && !missing.contains(scope) {
                missing.push(scope.clone());
            }
        }
        if !missing.is_empty() {
            v.insufficient_scopes = true;
            v.reject(AuthorizationError::InsufficientScopes {
                missing: missing.clone(),
            });
            v.missing_scopes = missing;
        }

        let exp = claims.exp;
        v.claims = Some(claims);

        if v.errors.is_empty() {
            // Another validation may have consumed or revoked it since the checks above.
            match self.jtis.try_consume(&jti, exp) {
                ConsumeOutcome::Consumed => v.valid = true,
                ConsumeOutcome::AlreadyConsumed => {
                    v.replayed = true;
                    v.reject(AuthorizationError::Replayed { jti: jti.clone() });
                }
                ConsumeOutcome::Revoked => {
                    v.revoked = true;
                    v.reject(AuthorizationError::Revoked { jti: jti.clone() });
                }
            }
        }

        if v.valid {
            tracing::debug!(jti = %jti, "token validated");
            self.audit.record(AuditEvent::new(
                AuditEventKind::TokenValidated,
                &jti,
                json!({ "required_scopes": required_scopes }),
            ));
        } else {
            self.record_rejection(Some(&jti), &v);
        }
        v
    }

    fn record_rejection(&self, jti: Option<&str>, v: &TokenValidation) {
        self.metrics.inc_tokens_rejected();
        obs::emit_token_rejected(jti, &v.errors);

        let subject = jti.unwrap_or("-");
        self.audit.record(AuditEvent::warn(
            AuditEventKind::TokenRejected,
            subject,
            json!({
                "errors": v.errors,
                "expired": v.expired,
                "revoked": v.revoked,
                "replayed": v.replayed,
                "missing_scopes": v.missing_scopes,
            }),
        ));
        if v.replayed {
            self.metrics.inc_replays_blocked();
            self.audit.record(AuditEvent::warn(
                AuditEventKind::TokenReplayed,
                subject,
                json!({}),
            ));
        }
    }

    // ------------------------------------------------------------------
    // Refresh
    // ------------------------------------------------------------------

    pub fn needs_refresh(&self, token: &str) -> Result<bool, AuthorizationError> {
        self.needs_refresh_at(token, Utc::now())
    }

    /// True once the token's age reaches the refresh ratio of its lifetime.
    pub fn needs_refresh_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, AuthorizationError> {
        let claims = self.decode(token)?;
        Ok(self.is_due_for_refresh(&claims, now))
    }

    pub fn refresh_token(&self, token: &str) -> Result<IssuedToken, AuthorizationError> {
        self.refresh_token_at(token, Utc::now())
    }

    /// Re-mint a token with a new jti and lifetime and identical claims.
    ///
    /// The superseded jti is revoked so only the new token stays usable.
    pub fn refresh_token_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, AuthorizationError> {
        let old = self.decode(token)?;
        if old.iss != self.config.issuer {
            return Err(AuthorizationError::WrongIssuer {
                expected: self.config.issuer.clone(),
                actual: old.iss,
            });
        }
        if self.jtis.is_revoked(&old.jti) {
            return Err(AuthorizationError::Revoked { jti: old.jti });
        }
        if old.is_expired(now) {
            return Err(AuthorizationError::Expired { jti: old.jti });
        }

        let ttl = self.config.effective_ttl_secs();
        let claims = TokenClaims {
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(ttl)).timestamp(),
            ..old.clone()
        };
        let issued = self.issue(claims)?;

        self.jtis.revoke(&old.jti, old.exp);
        self.cache().insert(
            (old.sub.clone(), old.ctx.issue_id.clone()),
            issued.clone(),
        );

        self.audit.record(AuditEvent::new(
            AuditEventKind::TokenRefreshed,
            &issued.claims.jti,
            json!({ "previous_jti": old.jti }),
        ));
        Ok(issued)
    }

    // ------------------------------------------------------------------
    // Revocation
    // ------------------------------------------------------------------

    /// Revoke a token immediately. Returns its jti.
    pub fn revoke_token(&self, token: &str) -> Result<String, AuthorizationError> {
        let claims = self.decode(token)?;
        self.revoke_jti(&claims.jti, claims.expires_at());
        Ok(claims.jti)
    }

    /// Revoke by id. `expires_at` bounds how long the marker is kept.
    pub fn revoke_jti(&self, jti: &str, expires_at: DateTime<Utc>) {
        self.jtis.revoke(jti, expires_at.timestamp());
        self.cache().retain(|_, t| t.claims.jti != jti);
        tracing::info!(jti = %jti, "token revoked");
        self.audit.record(AuditEvent::new(
            AuditEventKind::TokenRevoked,
            jti,
            json!({ "exp": expires_at.timestamp() }),
        ));
    }

    /// Revoke every token minted under a session. Returns how many were revoked.
    pub fn revoke_session(&self, session_id: &str) -> usize {
        let revoked = self.jtis.revoke_session(session_id);
        self.cache()
            .retain(|_, t| t.claims.sid.as_deref() != Some(session_id));
        tracing::info!(session_id = %session_id, count = revoked.len(), "session revoked");
        self.audit.record(AuditEvent::new(
            AuditEventKind::SessionRevoked,
            session_id,
            json!({ "jtis": revoked }),
        ));
        revoked.len()
    }

    // ------------------------------------------------------------------
    // Maintenance and keys
    // ------------------------------------------------------------------

    /// Reclaim replay/revocation markers and cached tokens past their expiry.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        self.cache().retain(|_, t| !t.claims.is_expired(now));
        let purged = self.jtis.purge_expired(now);
        if purged > 0 {
            tracing::debug!(purged, "expired jti entries reclaimed");
        }
        purged
    }

    /// Verified claims without touching replay state.
    pub fn inspect(&self, token: &str) -> Result<TokenClaims, AuthorizationError> {
        self.decode(token)
    }

    pub fn rotate_keys(&self) -> String {
        self.keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .rotate()
    }

    pub fn active_kid(&self) -> String {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .active_kid()
            .to_string()
    }

    pub fn jwks(&self) -> JwkSet {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .jwks()
    }

    pub fn jti_store(&self) -> &JtiStore {
        &self.jtis
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::domain::{IssueCategory, Severity, Strategy};
    use chrono::TimeZone;

    fn fixture() -> (TokenAuthenticator, Arc<MemoryAuditSink>, Arc<Metrics>) {
        let sink = Arc::new(MemoryAuditSink::new());
        let metrics = Arc::new(Metrics::new());
        let auth = TokenAuthenticator::new(
            KeyManager::from_secret_bytes(&[3u8; 32]),
            TokenConfig::default(),
            sink.clone(),
            metrics.clone(),
        );
        (auth, sink, metrics)
    }

    fn issue() -> Issue {
        Issue {
            id: "issue-1".into(),
            category: IssueCategory::DataQuality,
            severity: Severity::High,
            title: "duplicate observations".into(),
            description: String::new(),
            affected_resources: vec![],
        }
    }

    fn action(id: &str) -> RemediationAction {
        RemediationAction {
            id: id.into(),
            issue_id: "issue-1".into(),
            strategy: Strategy::DataCorrection,
            steps: vec![],
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
    }

    fn read_obs() -> Vec<String> {
        vec!["fhir.read:Observation".to_string()]
    }

    #[test]
    fn test_ttl_clamped() {
        let cfg = TokenConfig {
            ttl_secs: 3600,
            ..Default::default()
        };
        assert_eq!(cfg.effective_ttl_secs(), MAX_TTL_SECS);
        let cfg = TokenConfig {
            ttl_secs: 10,
            ..Default::default()
        };
        assert_eq!(cfg.effective_ttl_secs(), MIN_TTL_SECS);
    }

    #[test]
    fn test_mint_validate_replay() {
        let (auth, sink, metrics) = fixture();
        let t = auth
            .mint_token_at(&action("a1"), &issue(), &read_obs(), MintOptions::default(), t0())
            .unwrap();
        assert_eq!(t.claims.exp - t.claims.iat, DEFAULT_TTL_SECS);

        let first = auth.validate_token_at(&t.token, &read_obs(), t0());
        assert!(first.valid, "{:?}", first.errors);

        let second = auth.validate_token_at(&t.token, &read_obs(), t0());
        assert!(!second.valid);
        assert!(second.replayed);
        assert!(matches!(
            second.into_result(),
            Err(AuthorizationError::Replayed { .. })
        ));

        assert_eq!(sink.events_of(AuditEventKind::TokenReplayed).len(), 1);
        assert_eq!(metrics.snapshot().replays_blocked, 1);
    }

    #[test]
    fn test_missing_scopes_itemized() {
        let (auth, _, _) = fixture();
        let t = auth
            .mint_token_at(&action("a1"), &issue(), &read_obs(), MintOptions::default(), t0())
            .unwrap();
        let required = vec![
            "fhir.read:Observation".to_string(),
            "fhir.write:Observation".to_string(),
        ];
        let v = auth.validate_token_at(&t.token, &required, t0());
        assert!(!v.valid);
        assert!(v.insufficient_scopes);
        assert_eq!(v.missing_scopes, vec!["fhir.write:Observation"]);
        assert!(v.claims.is_some());
        // A failed validation does not consume the jti.
        assert!(!auth.jti_store().is_consumed(t.jti()));
    }

    #[test]
    fn test_expired_and_revoked_reported_together() {
        let (auth, _, _) = fixture();
        let t = auth
            .mint_token_at(&action("a1"), &issue(), &read_obs(), MintOptions::default(), t0())
            .unwrap();
        auth.revoke_token(&t.token).unwrap();
        let later = t0() + Duration::seconds(DEFAULT_TTL_SECS + 1);
        let v = auth.validate_token_at(&t.token, &read_obs(), later);
        assert!(v.expired);
        assert!(v.revoked);
        assert_eq!(v.errors.len(), 2);
    }

    #[test]
    fn test_wrong_issuer_rejected_before_claims_trusted() {
        let (auth, _, _) = fixture();
        let other = TokenAuthenticator::new(
            KeyManager::from_secret_bytes(&[3u8; 32]),
            TokenConfig {
                issuer: "someone-else".into(),
                ..Default::default()
            },
            Arc::new(MemoryAuditSink::new()),
            Arc::new(Metrics::new()),
        );
        let t = other
            .mint_token_at(&action("a1"), &issue(), &read_obs(), MintOptions::default(), t0())
            .unwrap();
        let v = auth.validate_token_at(&t.token, &read_obs(), t0());
        assert!(!v.valid);
        assert!(v.claims.is_none());
        assert!(matches!(
            v.into_result(),
            Err(AuthorizationError::WrongIssuer { .. })
        ));
    }

    #[test]
    fn test_cache_reuse_rules() {
        let (auth, _, _) = fixture();
        let a = action("a1");
        let first = auth
            .mint_token_at(&a, &issue(), &read_obs(), MintOptions::default(), t0())
            .unwrap();
        let again = auth
            .mint_token_at(&a, &issue(), &read_obs(), MintOptions::default(), t0())
            .unwrap();
        assert_eq!(first.jti(), again.jti());

        // Different scopes mint fresh.
        let wider = vec![
            "fhir.read:Observation".to_string(),
            "fhir.write:Observation".to_string(),
        ];
        let other = auth
            .mint_token_at(&a, &issue(), &wider, MintOptions::default(), t0())
            .unwrap();
        assert_ne!(first.jti(), other.jti());

        // Consumed tokens are never handed out again.
        assert!(auth.validate_token_at(&other.token, &wider, t0()).valid);
        let after = auth
            .mint_token_at(&a, &issue(), &wider, MintOptions::default(), t0())
            .unwrap();
        assert_ne!(after.jti(), other.jti());
    }

    #[test]
    fn test_invalid_scope_refused_at_mint() {
        let (auth, _, _) = fixture();
        let err = auth
            .mint_token_at(
                &action("a1"),
                &issue(),
                &["everything".to_string()],
                MintOptions::default(),
                t0(),
            )
            .unwrap_err();
        assert!(matches!(err, AuthorizationError::Malformed(_)));
    }

    #[test]
    fn test_refresh_window_and_refresh() {
        let (auth, sink, _) = fixture();
        let t = auth
            .mint_token_at(
                &action("a1"),
                &issue(),
                &read_obs(),
                MintOptions::default().with_session("s1"),
                t0(),
            )
            .unwrap();
        assert!(!auth
            .needs_refresh_at(&t.token, t0() + Duration::seconds(143))
            .unwrap());
        assert!(auth
            .needs_refresh_at(&t.token, t0() + Duration::seconds(144))
            .unwrap());

        let now = t0() + Duration::seconds(150);
        let fresh = auth.refresh_token_at(&t.token, now).unwrap();
        assert_ne!(fresh.jti(), t.jti());
        assert_eq!(fresh.claims.scopes, t.claims.scopes);
        assert_eq!(fresh.claims.sid, t.claims.sid);
        assert_eq!(fresh.claims.ctx, t.claims.ctx);
        assert_eq!(fresh.claims.iat, now.timestamp());
        assert_eq!(sink.events_of(AuditEventKind::TokenRefreshed).len(), 1);

        // The superseded token is dead; the new one is tracked under the session.
        assert!(auth.validate_token_at(&t.token, &read_obs(), now).revoked);
        assert!(auth.refresh_token_at(&t.token, now).is_err());
        assert_eq!(auth.revoke_session("s1"), 2);
        assert!(auth.validate_token_at(&fresh.token, &read_obs(), now).revoked);
    }

    #[test]
    fn test_refresh_refuses_forged_token() {
        let (auth, _, _) = fixture();
        let t = auth
            .mint_token_at(&action("a1"), &issue(), &read_obs(), MintOptions::default(), t0())
            .unwrap();
        let forged = format!("{}x", t.token);
        assert!(auth.refresh_token_at(&forged, t0()).is_err());
    }

    #[test]
    fn test_rotation_keeps_outstanding_tokens_valid() {
        let (auth, _, _) = fixture();
        let t = auth
            .mint_token_at(&action("a1"), &issue(), &read_obs(), MintOptions::default(), t0())
            .unwrap();
        let old_kid = auth.active_kid();
        let new_kid = auth.rotate_keys();
        assert_ne!(old_kid, new_kid);
        assert_eq!(auth.jwks().keys.len(), 2);
        assert!(auth.validate_token_at(&t.token, &read_obs(), t0()).valid);
    }

    #[test]
    fn test_purge_expired() {
        let (auth, _, _) = fixture();
        let t = auth
            .mint_token_at(&action("a1"), &issue(), &read_obs(), MintOptions::default(), t0())
            .unwrap();
        assert!(auth.validate_token_at(&t.token, &read_obs(), t0()).valid);
        assert_eq!(auth.purge_expired(t0()), 0);
        assert_eq!(
            auth.purge_expired(t0() + Duration::seconds(DEFAULT_TTL_SECS + 1)),
            1
        );
        // Reclaimed jti still fails on expiry.
        let later = t0() + Duration::seconds(DEFAULT_TTL_SECS + 2);
        assert!(auth.validate_token_at(&t.token, &read_obs(), later).expired);
    }
}
