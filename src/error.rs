//! Classified pipeline errors.
//!
//! Fatal failures are created as [`SkwError`] values at the point where they
//! are first recognized, then travel through `anyhow` like every other error
//! in the crate. The CLI recovers the category tag by walking the error chain
//! so the process can exit with `error[<Tag>]: ...` on stderr.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SkwError {
    #[error("missing configuration: {0}")]
    ConfigMissing(String),

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("book XML not found: {0}")]
    XmlMissing(String),

    #[error("malformed book XML: {0}")]
    XmlMalformed(String),

    #[error("dependency cycle not covered by any ordered build group: {}", packages.join(", "))]
    UnhandledCycle { packages: Vec<String> },

    #[error("malformed rewrite rule '{rule}': {reason}")]
    RuleMalformed { rule: String, reason: String },

    #[error("script '{script}' failed with {status}")]
    ScriptFailed { script: String, status: String },

    #[error("{tool} failed: {detail}")]
    ExternalToolFailed { tool: String, detail: String },

    #[error("repository unreachable: {0}")]
    RepoUnreachable(String),

    #[error("checksum mismatch for '{name}': expected {expected}, actual {actual}")]
    IntegrityError {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("upload target may not be HTTP(S): {0}")]
    UploadRejected(String),

    #[error("archive member escapes the extraction root: {0}")]
    PathEscape(String),
}

impl SkwError {
    /// Short category tag printed alongside fatal errors.
    pub fn tag(&self) -> &'static str {
        match self {
            SkwError::ConfigMissing(_) => "ConfigMissing",
            SkwError::ConfigInvalid(_) => "ConfigInvalid",
            SkwError::XmlMissing(_) => "XmlMissing",
            SkwError::XmlMalformed(_) => "XmlMalformed",
            SkwError::UnhandledCycle { .. } => "UnhandledCycle",
            SkwError::RuleMalformed { .. } => "RuleMalformed",
            SkwError::ScriptFailed { .. } => "ScriptFailed",
            SkwError::ExternalToolFailed { .. } => "ExternalToolFailed",
            SkwError::RepoUnreachable(_) => "RepoUnreachable",
            SkwError::IntegrityError { .. } => "IntegrityError",
            SkwError::UploadRejected(_) => "UploadRejected",
            SkwError::PathEscape(_) => "PathEscape",
        }
    }
}

/// Recover the category tag from an `anyhow` chain, if any link is classified.
pub fn category_tag(err: &anyhow::Error) -> &'static str {
    for cause in err.chain() {
        if let Some(skw) = cause.downcast_ref::<SkwError>() {
            return skw.tag();
        }
    }
    "Error"
}
