//! Pipeline validation.
//!
//! - Layer 1: structure (non-empty graph, ids, known types, dependency targets)
//! - Layer 2: parameters (presence, kinds, per-type rules)
//! - Layer 3: type compatibility between producers and consumers
//!
//! Layer 3 runs only when layers 1 and 2 produced no errors. Cycle detection
//! lives in [`crate::graph::ordering`] and is folded in by [`validate_document`].

mod layer1_structure;
mod layer2_parameters;
mod layer3_compatibility;
mod types;

use crate::catalog::NodeCatalog;
use crate::dsl::parser::{parse_pipeline, DslFormat};
use crate::dsl::schema::PipelineDocument;
use crate::graph::DependencyGraph;

pub use types::{Severity, ValidationError, ValidationErrorKind, ValidationReport};

/// Parse and validate pipeline source text.
pub fn validate_pipeline(content: &str, format: DslFormat, catalog: &NodeCatalog) -> ValidationReport {
    match parse_pipeline(content, format) {
        Ok(doc) => validate_document(&doc, catalog),
        Err(errors) => ValidationReport::from_diagnostics(errors),
    }
}

/// Run every validation phase over a parsed document.
pub fn validate_document(doc: &PipelineDocument, catalog: &NodeCatalog) -> ValidationReport {
    let mut report = ValidationReport::from_diagnostics(validate_semantics(doc, catalog));
    if !report.is_valid {
        return report;
    }
    report.extend(validate_compatibility(doc, catalog));
    if let Err(cycle) = DependencyGraph::from_declarations(&doc.nodes).topological_order() {
        report.extend([cycle.to_validation_error()]);
    }
    report
}

/// Semantic checks 1 to 6: structure, then parameters.
pub fn validate_semantics(doc: &PipelineDocument, catalog: &NodeCatalog) -> Vec<ValidationError> {
    let (mut diags, unknown) = layer1_structure::validate(doc, catalog);
    let structure_fatal = diags
        .iter()
        .any(|d| d.is_error() && d.code == "E003");
    if !structure_fatal {
        diags.extend(layer2_parameters::validate(doc, catalog, &unknown));
    }
    diags
}

/// Producer/consumer compatibility. Only meaningful after semantic checks pass.
pub fn validate_compatibility(doc: &PipelineDocument, catalog: &NodeCatalog) -> Vec<ValidationError> {
    layer3_compatibility::validate(doc, catalog)
}
