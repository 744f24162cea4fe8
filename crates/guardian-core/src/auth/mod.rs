//! Token authentication: short-lived, per-action, scoped Ed25519 tokens.
//!
//! - [`keys`]:          `KeyManager` (active key, rotation, JWKS)
//! - [`jti`]:           `JtiStore` (consumed / revoked / session index)
//! - [`token`]:         claims and the JWS compact codec
//! - [`authenticator`]: `TokenAuthenticator` (mint, validate, refresh, revoke)
//! - [`scopes`]:        `determine_scopes_for_action`

pub mod authenticator;
pub mod jti;
pub mod keys;
pub mod scopes;
pub mod token;

pub use authenticator::{
    IssuedToken, MintOptions, TokenAuthenticator, TokenConfig, TokenValidation,
    DEFAULT_TTL_SECS, MAX_TTL_SECS, MIN_TTL_SECS,
};
pub use jti::{ConsumeOutcome, JtiStore};
pub use keys::{compute_kid, Jwk, JwkSet, KeyError, KeyManager};
pub use scopes::determine_scopes_for_action;
pub use token::{ActionContext, TokenClaims};
