//! Tool registry: catalog of remediation tools with declared capabilities,
//! semver versions and integrity checksums.
//!
//! - [`tool`]:   `ToolMetadata`, `ToolCapabilities`, checksum helpers
//! - [`store`]:  `ToolRegistry` (register, verify_integrity, queries)
//! - [`semver`]: version parsing used by registration checks

pub mod semver;
pub mod store;
pub mod tool;

pub use store::ToolRegistry;
pub use tool::{
    compute_checksum, is_valid_checksum, CapabilityKind, ToolCapabilities, ToolLimits,
    ToolMetadata,
};
