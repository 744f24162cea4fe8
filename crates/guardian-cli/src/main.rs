//! Guardian CLI
//!
//! Offline helpers for operators preparing tools and actions for Guardian.
//!
//! ## Commands
//!
//! - `keygen`: Generate an Ed25519 signing key and print its JWKS
//! - `checksum`: SHA-256 of a tool artifact
//! - `verify-manifest`: Validate a tool manifest, optionally against its artifact
//! - `scopes`: Validate an action's steps and print its minimal scopes
//! - `mint`: Mint an action token with the configured key
//! - `scan`: Report PHI, SQL-injection and XSS findings in text
//! - `redact`: Replace PHI in text with typed placeholders
//! - `check-config`: Load and validate a configuration file

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, Level};

use guardian_core::telemetry::init_tracing;
use guardian_core::validation::ThreatReport;
use guardian_core::{
    compute_checksum, determine_scopes_for_action, Guardian, GuardianConfig, Issue, KeyManager,
    PhiDetector, RemediationAction, SchemaValidator, SqlInjectionDetector, ToolMetadata,
    XssDetector,
};

#[derive(Parser)]
#[command(name = "guardian")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Trust-and-execution guard for automated remediation tools", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file (TOML); GUARDIAN_* variables override it
    #[arg(short, long, global = true, env = "GUARDIAN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a signing key; prints the secret and the public JWKS
    Keygen,

    /// Compute the SHA-256 checksum of a tool artifact
    Checksum {
        /// Artifact file
        file: PathBuf,
    },

    /// Validate a tool manifest (JSON)
    VerifyManifest {
        /// Manifest file
        manifest: PathBuf,

        /// Artifact whose checksum must match the manifest
        #[arg(long)]
        artifact: Option<PathBuf>,
    },

    /// Validate an action (JSON) and print the scopes it needs
    Scopes {
        /// Remediation action file
        action: PathBuf,
    },

    /// Mint a token for an action
    Mint {
        /// Remediation action file
        #[arg(long)]
        action: PathBuf,

        /// Issue the action remediates
        #[arg(long)]
        issue: PathBuf,
    },

    /// Scan text for PHI and injection signatures
    Scan {
        /// Text to scan
        text: String,
    },

    /// Redact PHI from text
    Redact {
        /// Text to redact
        text: String,
    },

    /// Load the configuration and print it with secrets redacted
    CheckConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(cli.json, level);

    match cli.command {
        Commands::Keygen => cmd_keygen(),
        Commands::Checksum { file } => cmd_checksum(&file),
        Commands::VerifyManifest { manifest, artifact } => {
            cmd_verify_manifest(&manifest, artifact.as_deref())
        }
        Commands::Scopes { action } => cmd_scopes(&action),
        Commands::Mint { action, issue } => {
            cmd_mint(&load_config(cli.config.as_deref())?, &action, &issue)
        }
        Commands::Scan { text } => cmd_scan(&text),
        Commands::Redact { text } => {
            println!("{}", PhiDetector::new().redact(&text));
            Ok(())
        }
        Commands::CheckConfig => {
            let config = load_config(cli.config.as_deref())?;
            println!("{config:#?}");
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<GuardianConfig> {
    let config = match path {
        Some(path) => GuardianConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => GuardianConfig::default(),
    };
    config
        .with_env_overrides(|key| std::env::var(key).ok())
        .validate()
        .context("Invalid configuration")
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_keygen() -> Result<()> {
    let keys = KeyManager::generate();
    println!("kid:    {}", keys.active_kid());
    println!("secret: {}", keys.secret_hex());
    println!();
    println!("Set GUARDIAN_SIGNING_KEY to the secret. Public key set:");
    print_json(&keys.jwks())
}

fn artifact_checksum(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(compute_checksum(&bytes))
}

fn cmd_checksum(file: &Path) -> Result<()> {
    println!("{}  {}", artifact_checksum(file)?, file.display());
    Ok(())
}

fn verify_manifest(manifest: &Path, artifact: Option<&Path>) -> Result<ToolMetadata> {
    let tool: ToolMetadata = read_json(manifest)?;
    tool.validate()
        .with_context(|| format!("Manifest for '{}' is invalid", tool.id))?;

    if let Some(artifact) = artifact {
        let actual = artifact_checksum(artifact)?;
        if !tool.checksum.eq_ignore_ascii_case(&actual) {
            bail!(
                "Checksum mismatch for '{}': manifest {}, artifact {}",
                tool.id,
                tool.checksum,
                actual
            );
        }
        debug!(tool_id = %tool.id, "artifact checksum matches");
    }
    Ok(tool)
}

fn cmd_verify_manifest(manifest: &Path, artifact: Option<&Path>) -> Result<()> {
    let tool = verify_manifest(manifest, artifact)?;
    println!("{} {} ok", tool.id, tool.version);
    if !tool.approved {
        println!("note: manifest is not approved; Guardian will refuse to execute it");
    }
    Ok(())
}

fn action_scopes(path: &Path) -> Result<Vec<String>> {
    let action: RemediationAction = read_json(path)?;
    let validator = SchemaValidator::new();
    validator.register_step_schemas()?;
    validator
        .validate_action(&action)
        .with_context(|| format!("Action '{}' has invalid steps", action.id))?;
    Ok(determine_scopes_for_action(&action))
}

fn cmd_scopes(action: &Path) -> Result<()> {
    for scope in action_scopes(action)? {
        println!("{scope}");
    }
    Ok(())
}

fn cmd_mint(config: &GuardianConfig, action: &Path, issue: &Path) -> Result<()> {
    if config.signing_key_hex.is_none() {
        bail!("No signing key configured; run `guardian keygen` and set GUARDIAN_SIGNING_KEY");
    }
    let action: RemediationAction = read_json(action)?;
    let issue: Issue = read_json(issue)?;

    let guardian = Guardian::new(config.clone()).context("Failed to initialise Guardian")?;
    let issued = guardian
        .request_token(&action, &issue, None)
        .context("Token request refused")?;

    println!("{}", issued.token);
    debug!(jti = %issued.jti(), expires_at = %issued.expires_at(), "token minted");
    Ok(())
}

#[derive(Debug, Serialize)]
struct ScanReport {
    phi: Vec<String>,
    sql_injection: ThreatReport,
    xss: ThreatReport,
}

fn scan(text: &str) -> ScanReport {
    ScanReport {
        phi: PhiDetector::new()
            .types(text)
            .into_iter()
            .map(|t| t.as_str().to_string())
            .collect(),
        sql_injection: SqlInjectionDetector::new().detect(text),
        xss: XssDetector::new().detect(text),
    }
}

fn cmd_scan(text: &str) -> Result<()> {
    print_json(&scan(text))
}
