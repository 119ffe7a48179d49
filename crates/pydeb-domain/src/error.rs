use thiserror::Error;

/// Errors produced by the conversion engine.
///
/// Parsing and translation errors are never silently recovered: they abort
/// the requirement being processed and, under the default policy, the whole
/// run. Conflict errors carry both sides so the caller can resolve them with
/// an override instead of the engine guessing.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("invalid package name {name:?}: normalizes to the empty string")]
    InvalidName { name: String },

    #[error("unparsable version {version:?}: {reason}")]
    UnparsableVersion { version: String, reason: String },

    #[error("conflicting constraints on {package}: {existing} vs {incoming}")]
    ConflictingRelationship {
        package: String,
        existing: String,
        incoming: String,
    },

    #[error("malformed value for control field {field}: {reason}")]
    MalformedControlField { field: String, reason: String },

    #[error("requirement {requirement} cannot be satisfied: {reason}")]
    UnsatisfiableRequirement { requirement: String, reason: String },

    #[error("failed to build {package}: {reason}")]
    BuildFailure { package: String, reason: String },

    #[error("{first} and {second} both map to Debian package {name} {version}")]
    ArtifactConflict {
        name: String,
        version: String,
        first: String,
        second: String,
    },
}

pub type Result<T> = std::result::Result<T, ConversionError>;
