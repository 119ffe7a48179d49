#![deny(clippy::all, warnings)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod backend;
pub mod config;
pub mod convert;
pub mod hints;
pub mod interpreter;
pub mod outcome;
pub mod packer;
pub mod process;
pub mod report;

pub use backend::{Backend, PipBackend, SourcePackage};
pub use config::{ConvertOptions, ConverterConfig};
pub use convert::{convert, Converter};
pub use outcome::{outcome_for_error, CommandStatus, ExecutionOutcome};
pub use report::{ConversionReport, ConversionResult, FailedRequirement, PipelineStage};
