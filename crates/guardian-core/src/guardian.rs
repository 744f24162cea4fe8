//! The `Guardian` facade: one owned instance of every component.
//!
//! Construct it once at process start and share it by `Arc`. Components hold
//! each other by handle; there is no process-global state.

use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde_json::Value;

use crate::audit::{AuditSink, TracingAuditSink};
use crate::auth::{
    determine_scopes_for_action, IssuedToken, KeyError, KeyManager, MintOptions,
    TokenAuthenticator, TokenValidation,
};
use crate::config::GuardianConfig;
use crate::domain::error::{
    GuardianError, IntegrityError, PolicyViolation, ValidationError, WorkflowError,
};
use crate::domain::{Issue, RemediationAction};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::obs;
use crate::propose::{FileChange, MergeReadiness, Proposal, ProposeWorkflow, TestResult};
use crate::registry::{ToolMetadata, ToolRegistry};
use crate::sandbox::{
    ExecutionContext, ExecutionPolicy, ExecutionResult, ExecutionSandbox, HttpClient, HttpError,
    MemoryProbe, ReqwestHttpClient, ToolIo,
};
use crate::validation::{SchemaStage, SchemaValidator, ValidationReport};
use crate::vcs::{GitHubClient, VcsClient, VcsError};

/// Default timeout of the shared outbound client.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Failure to assemble a [`Guardian`].
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("signing key: {0}")]
    Keys(#[from] KeyError),

    #[error("http client: {0}")]
    Http(#[from] HttpError),

    #[error("vcs client: {0}")]
    Vcs(#[from] VcsError),

    #[error("built-in schemas: {0}")]
    Schemas(#[from] ValidationError),
}

/// Assembles a [`Guardian`], with injectable seams for tests.
pub struct GuardianBuilder {
    config: GuardianConfig,
    keys: Option<KeyManager>,
    audit: Option<Arc<dyn AuditSink>>,
    http: Option<Arc<dyn HttpClient>>,
    vcs: Option<Arc<dyn VcsClient>>,
    probe: Option<Arc<dyn MemoryProbe>>,
}

impl GuardianBuilder {
    pub fn with_keys(mut self, keys: KeyManager) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    /// Use this host instead of the one named in the config.
    pub fn with_vcs(mut self, vcs: Arc<dyn VcsClient>) -> Self {
        self.vcs = Some(vcs);
        self
    }

    pub fn with_memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn build(self) -> Result<Guardian, InitError> {
        let config = self.config;
        let audit = self.audit.unwrap_or_else(|| Arc::new(TracingAuditSink));
        let metrics = Arc::new(Metrics::new());

        let keys = match (self.keys, &config.signing_key_hex) {
            (Some(keys), _) => keys,
            (None, Some(secret)) => KeyManager::from_secret_hex(secret)?,
            (None, None) => KeyManager::generate(),
        };
        let auth = Arc::new(TokenAuthenticator::new(
            keys,
            config.token.clone(),
            audit.clone(),
            metrics.clone(),
        ));

        let validator = Arc::new(SchemaValidator::new());
        validator.register_step_schemas()?;

        let http: Arc<dyn HttpClient> = match self.http {
            Some(http) => http,
            None => Arc::new(ReqwestHttpClient::new(HTTP_TIMEOUT)?),
        };
        let mut sandbox =
            ExecutionSandbox::new(auth.clone(), http, audit.clone(), metrics.clone());
        if let Some(probe) = self.probe {
            sandbox = sandbox.with_memory_probe(probe);
        }

        let vcs: Option<Arc<dyn VcsClient>> = match (self.vcs, &config.vcs) {
            (Some(vcs), _) => Some(vcs),
            (None, Some(github)) => Some(Arc::new(GitHubClient::new(github.clone())?)),
            (None, None) => None,
        };
        let mut workflow =
            ProposeWorkflow::new(config.workflow.clone(), audit.clone(), metrics.clone());
        if let Some(vcs) = vcs {
            workflow = workflow.with_vcs(vcs);
        }

        tracing::info!(
            issuer = %config.token.issuer,
            kid = %auth.active_kid(),
            dry_run = workflow.is_dry_run(),
            "guardian initialised"
        );

        Ok(Guardian {
            registry: RwLock::new(ToolRegistry::new(audit.clone())),
            auth,
            validator,
            sandbox: Arc::new(sandbox),
            workflow: Arc::new(workflow),
            audit,
            metrics,
        })
    }
}

pub struct Guardian {
    registry: RwLock<ToolRegistry>,
    auth: Arc<TokenAuthenticator>,
    validator: Arc<SchemaValidator>,
    sandbox: Arc<ExecutionSandbox>,
    workflow: Arc<ProposeWorkflow>,
    audit: Arc<dyn AuditSink>,
    metrics: Arc<Metrics>,
}

impl Guardian {
    pub fn builder(config: GuardianConfig) -> GuardianBuilder {
        GuardianBuilder {
            config,
            keys: None,
            audit: None,
            http: None,
            vcs: None,
            probe: None,
        }
    }

    /// Build with production defaults: tracing audit sink, reqwest egress
    /// and a GitHub client when `[vcs]` is configured.
    pub fn new(config: GuardianConfig) -> Result<Self, InitError> {
        Self::builder(config).build()
    }

    // ------------------------------------------------------------------
    // Tools
    // ------------------------------------------------------------------

    /// Register a tool and install a policy derived from its declared
    /// capabilities unless one is already set.
    pub fn register_tool(&self, metadata: ToolMetadata) -> Result<(), IntegrityError> {
        let policy = ExecutionPolicy::for_tool(&metadata);
        let tool_id = metadata.id.clone();
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(metadata)?;
        if self.sandbox.policy(&tool_id).is_none() {
            self.sandbox.set_policy(tool_id, policy);
        }
        Ok(())
    }

    pub fn approve_tool(&self, tool_id: &str) -> bool {
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .approve(tool_id)
    }

    pub fn verify_integrity(&self, tool_id: &str, checksum: &str) -> Result<(), IntegrityError> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .verify_integrity(tool_id, checksum)
    }

    pub fn tool(&self, tool_id: &str) -> Option<ToolMetadata> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tool_id)
            .cloned()
    }

    pub fn list_tools(&self) -> Vec<ToolMetadata> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .list()
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn set_policy(&self, tool_id: impl Into<String>, policy: ExecutionPolicy) {
        self.sandbox.set_policy(tool_id, policy);
    }

    // ------------------------------------------------------------------
    // Tokens
    // ------------------------------------------------------------------

    /// Mint a token for `action`. Without explicit scopes the minimal set is
    /// derived from the action's strategy and steps.
    ///
    /// Every step is validated against its step schema first.
    pub fn request_token(
        &self,
        action: &RemediationAction,
        issue: &Issue,
        scopes: Option<&[String]>,
    ) -> Result<IssuedToken, GuardianError> {
        self.request_token_with(action, issue, scopes, MintOptions::default())
    }

    pub fn request_token_with(
        &self,
        action: &RemediationAction,
        issue: &Issue,
        scopes: Option<&[String]>,
        options: MintOptions,
    ) -> Result<IssuedToken, GuardianError> {
        self.validator.validate_action(action)?;
        let derived;
        let scopes = match scopes {
            Some(scopes) => scopes,
            None => {
                derived = determine_scopes_for_action(action);
                &derived
            }
        };
        Ok(self.auth.mint_token(action, issue, scopes, options)?)
    }

    pub fn validate_token(&self, token: &str, required_scopes: &[String]) -> TokenValidation {
        self.auth.validate_token(token, required_scopes)
    }

    pub fn revoke_session(&self, session_id: &str) -> usize {
        self.auth.revoke_session(session_id)
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Run a registered tool behind every gate.
    ///
    /// Before the sandbox runs, the tool must be registered and approved,
    /// and `context.checksum` must be present and match the registered one.
    /// Tools naming schemas get their input validated before any gate and
    /// their output validated inside the sandbox, before the outcome is
    /// recorded. Every failure comes back in the envelope.
    pub async fn execute<F, Fut, E>(
        &self,
        tool_id: &str,
        input: Value,
        context: ExecutionContext,
        executor: F,
    ) -> ExecutionResult
    where
        F: FnOnce(Value, ToolIo) -> Fut,
        Fut: Future<Output = Result<Value, E>>,
        E: std::fmt::Display,
    {
        let tool = match self.admit(tool_id, context.checksum.as_deref()) {
            Ok(tool) => tool,
            Err(error) => {
                obs::emit_gate_rejected(tool_id, "registry", &error);
                if matches!(error, GuardianError::Policy(_)) {
                    self.metrics.inc_policy_violations();
                }
                return ExecutionResult::failure("-", tool_id, error, 0);
            }
        };

        let input = match &tool.input_schema {
            Some(schema) => match self.validator.validate(SchemaStage::Input, schema, &input) {
                Ok(validated) => validated,
                Err(error) => {
                    let error = GuardianError::from(error);
                    obs::emit_gate_rejected(tool_id, "input_schema", &error);
                    return ExecutionResult::failure("-", tool_id, error, 0);
                }
            },
            None => input,
        };

        let validator = &self.validator;
        let check_output = |output: Value| match &tool.output_schema {
            Some(schema) => validator
                .validate(SchemaStage::Output, schema, &output)
                .map_err(|error| {
                    let error = GuardianError::from(error);
                    obs::emit_gate_rejected(tool_id, "output_schema", &error);
                    error
                }),
            None => Ok(output),
        };
        self.sandbox
            .execute_checked(&tool, input, context, executor, check_output)
            .await
    }

    fn admit(&self, tool_id: &str, checksum: Option<&str>) -> Result<ToolMetadata, GuardianError> {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        let tool = registry
            .get(tool_id)
            .cloned()
            .ok_or_else(|| IntegrityError::UnknownTool {
                tool_id: tool_id.to_string(),
            })?;
        registry.verify_presented(tool_id, checksum)?;
        if !tool.approved {
            return Err(PolicyViolation::ToolNotApproved {
                tool_id: tool_id.to_string(),
            }
            .into());
        }
        Ok(tool)
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    pub fn validate(&self, schema_name: &str, data: &Value) -> ValidationReport {
        self.validator.validate_input(schema_name, data)
    }

    pub fn validate_output(&self, schema_name: &str, data: &Value) -> ValidationReport {
        self.validator.validate_output(schema_name, data)
    }

    // ------------------------------------------------------------------
    // Proposals
    // ------------------------------------------------------------------

    pub fn propose(
        &self,
        issue: Issue,
        action: RemediationAction,
        changes: Vec<FileChange>,
    ) -> Result<Proposal, WorkflowError> {
        self.workflow.create_proposal(issue, action, changes)
    }

    pub async fn submit(&self, proposal_id: &str) -> Result<Proposal, WorkflowError> {
        self.workflow.submit_proposal(proposal_id).await
    }

    pub fn approve(&self, proposal_id: &str, reviewer: &str) -> Result<Proposal, WorkflowError> {
        self.workflow.approve_proposal(proposal_id, reviewer, None)
    }

    pub async fn reject(
        &self,
        proposal_id: &str,
        reviewer: &str,
        reason: Option<String>,
    ) -> Result<Proposal, WorkflowError> {
        self.workflow
            .reject_proposal(proposal_id, reviewer, reason)
            .await
    }

    pub fn record_test_result(
        &self,
        proposal_id: &str,
        result: TestResult,
    ) -> Result<Proposal, WorkflowError> {
        self.workflow.record_test_result(proposal_id, result)
    }

    pub async fn can_merge(&self, proposal_id: &str) -> Result<MergeReadiness, WorkflowError> {
        self.workflow.can_merge(proposal_id).await
    }

    pub async fn merge(&self, proposal_id: &str) -> Result<Proposal, WorkflowError> {
        self.workflow.merge_proposal(proposal_id).await
    }

    pub async fn close(&self, proposal_id: &str, reason: &str) -> Result<Proposal, WorkflowError> {
        self.workflow.close_proposal(proposal_id, reason).await
    }

    // ------------------------------------------------------------------
    // Handles
    // ------------------------------------------------------------------

    pub fn authenticator(&self) -> &Arc<TokenAuthenticator> {
        &self.auth
    }

    pub fn validator(&self) -> &Arc<SchemaValidator> {
        &self.validator
    }

    pub fn sandbox(&self) -> &Arc<ExecutionSandbox> {
        &self.sandbox
    }

    pub fn workflow(&self) -> &Arc<ProposeWorkflow> {
        &self.workflow
    }

    pub fn audit_sink(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Emit the counters as one tracing event.
    pub fn flush_metrics(&self) {
        self.metrics.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::sandbox::StaticHttpClient;

    fn guardian() -> Guardian {
        Guardian::builder(GuardianConfig::default())
            .with_audit_sink(Arc::new(MemoryAuditSink::new()))
            .with_http_client(Arc::new(StaticHttpClient::new()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_with_configured_key() {
        let keys = KeyManager::generate();
        let config = GuardianConfig {
            signing_key_hex: Some(keys.secret_hex()),
            ..GuardianConfig::default()
        };
        let g = Guardian::builder(config)
            .with_http_client(Arc::new(StaticHttpClient::new()))
            .build()
            .unwrap();
        assert_eq!(g.authenticator().active_kid(), keys.active_kid());
        assert!(g.workflow().is_dry_run());
    }

    #[test]
    fn test_bad_signing_key_fails_init() {
        let config = GuardianConfig {
            signing_key_hex: Some("zz".into()),
            ..GuardianConfig::default()
        };
        assert!(matches!(
            Guardian::builder(config)
                .with_http_client(Arc::new(StaticHttpClient::new()))
                .build(),
            Err(InitError::Keys(_))
        ));
    }

    #[test]
    fn test_step_schemas_installed() {
        let g = guardian();
        assert!(g
            .validator()
            .has_schema(SchemaStage::Input, "step.update_record"));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_an_envelope_failure() {
        let g = guardian();
        let result = g
            .execute("nope", Value::Null, ExecutionContext::new("t"), |_, _| async {
                Ok::<_, String>(Value::Null)
            })
            .await;
        assert!(!result.success);
        assert!(matches!(
            result.error,
            Some(GuardianError::Integrity(IntegrityError::UnknownTool { .. }))
        ));
    }
}
