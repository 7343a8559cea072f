//! Pipeline source language: document types, parser and validation.

pub mod parser;
pub mod schema;
pub mod validation;

pub use parser::{parse_pipeline, DslFormat};
pub use schema::{NodeDeclaration, Params, PipelineDocument};
pub use validation::{
    validate_document, validate_pipeline, Severity, ValidationError, ValidationErrorKind,
    ValidationReport,
};
