//! Structured observability hooks for Guardian lifecycle events.
//!
//! Each helper emits one `tracing` event with a stable `event` field.
//! Security-relevant outcomes go out at `warn!`.

use tracing::{info, warn};

/// Span wrapping one sandboxed execution; attach with `Instrument`.
pub fn execution_span(tool_id: &str, execution_id: &str) -> tracing::Span {
    tracing::info_span!(
        "guardian.execution",
        tool_id = %tool_id,
        execution_id = %execution_id
    )
}

pub fn emit_token_minted(jti: &str, subject: &str, scopes: usize, ttl_secs: i64) {
    info!(event = "token.minted", jti = %jti, subject = %subject, scopes, ttl_secs);
}

pub fn emit_token_rejected(jti: Option<&str>, reasons: &[String]) {
    warn!(
        event = "token.rejected",
        jti = jti.unwrap_or("-"),
        reasons = %reasons.join("; "),
    );
}

pub fn emit_gate_rejected(tool_id: &str, gate: &str, error: &dyn std::fmt::Display) {
    warn!(event = "sandbox.gate_rejected", tool_id = %tool_id, gate = %gate, error = %error);
}

pub fn emit_execution_finished(tool_id: &str, duration_ms: u64, success: bool) {
    info!(
        event = "sandbox.execution_finished",
        tool_id = %tool_id,
        duration_ms,
        success,
    );
}

pub fn emit_egress(tool_id: &str, domain: &str, allowed: bool) {
    if allowed {
        info!(event = "sandbox.egress", tool_id = %tool_id, domain = %domain, allowed);
    } else {
        warn!(event = "sandbox.egress", tool_id = %tool_id, domain = %domain, allowed);
    }
}

pub fn emit_proposal_transition(proposal_id: &str, from: &str, to: &str) {
    info!(event = "proposal.transition", proposal_id = %proposal_id, from = %from, to = %to);
}

pub fn emit_merge_blocked(proposal_id: &str, reasons: &[String]) {
    warn!(
        event = "proposal.merge_blocked",
        proposal_id = %proposal_id,
        reasons = %reasons.join("; "),
    );
}
