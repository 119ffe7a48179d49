#![deny(clippy::all, warnings)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod control;
pub mod error;
pub mod name;
pub mod relationship;
pub mod requirement;
pub mod version;

pub use control::{merge_layers, parse_relationship_list, ControlDocument, RELATIONSHIP_FIELDS};
pub use error::{ConversionError, Result};
pub use name::{map_name, normalize_name, provides_name, NamingConfig};
pub use relationship::{
    combine_dependencies, translate_requirement, Dependency, RelOp, Relationship,
    TranslationConfig,
};
pub use requirement::{InterpreterFacts, Requirement};
pub use version::{
    compare_debian_versions, transform_version, transform_version_with_revision, PreTag,
    PythonVersion, DEFAULT_REVISION,
};
