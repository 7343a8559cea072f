use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::catalog::NodeCatalog;
use crate::dsl::schema::PipelineDocument;

use super::types::{ValidationError, ValidationErrorKind};

fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("valid id pattern"))
}

/// Structural checks: non-empty graph, ids, known types, dependency targets.
///
/// Returns the diagnostics and the ids of nodes whose type did not resolve;
/// no further node-level checks run for those.
pub fn validate(
    doc: &PipelineDocument,
    catalog: &NodeCatalog,
) -> (Vec<ValidationError>, HashSet<String>) {
    let mut diags = Vec::new();
    let mut unknown = HashSet::new();

    if doc.nodes.is_empty() {
        diags.push(error(
            ValidationErrorKind::Semantic,
            "E003",
            "Pipeline has no nodes".to_string(),
            None,
        ));
        return (diags, unknown);
    }

    let mut ids = HashSet::new();
    for (index, node) in doc.nodes.iter().enumerate() {
        if !ids.insert(node.id.as_str()) {
            diags.push(
                error(
                    ValidationErrorKind::Semantic,
                    "E007",
                    format!("Duplicate node id: {}", node.id),
                    Some(&node.id),
                )
                .at_location(format!("nodes[{}]", index)),
            );
        }
        if !id_pattern().is_match(&node.id) {
            diags.push(
                error(
                    ValidationErrorKind::Semantic,
                    "E008",
                    format!(
                        "Invalid node id '{}': must start with a letter and contain only letters, digits and underscores",
                        node.id
                    ),
                    Some(&node.id),
                )
                .at_field(format!("nodes[{}].id", index)),
            );
        }
    }

    for (index, node) in doc.nodes.iter().enumerate() {
        if !catalog.contains(&node.node_type) {
            diags.push(
                error(
                    ValidationErrorKind::Semantic,
                    "E009",
                    format!(
                        "Unknown node type '{}'. Known types: {}",
                        node.node_type,
                        catalog.known_types().join(", ")
                    ),
                    Some(&node.id),
                )
                .at_field(format!("nodes[{}].type", index)),
            );
            unknown.insert(node.id.clone());
            continue;
        }

        let mut seen = HashSet::new();
        for (i, dep) in node.depends_on.iter().enumerate() {
            if !seen.insert(dep.as_str()) {
                diags.push(
                    ValidationError::warning(
                        ValidationErrorKind::Dependency,
                        "W001",
                        format!("Node '{}' lists dependency '{}' more than once", node.id, dep),
                    )
                    .at_node(&node.id)
                    .at_field(format!("nodes[{}].depends_on[{}]", index, i)),
                );
                continue;
            }
            if !ids.contains(dep.as_str()) {
                diags.push(
                    error(
                        ValidationErrorKind::Dependency,
                        "E010",
                        format!("Node '{}' depends on unknown node '{}'", node.id, dep),
                        Some(&node.id),
                    )
                    .at_field(format!("nodes[{}].depends_on[{}]", index, i)),
                );
            }
        }
    }

    (diags, unknown)
}

fn error(
    kind: ValidationErrorKind,
    code: &str,
    message: String,
    node_id: Option<&str>,
) -> ValidationError {
    let e = ValidationError::error(kind, code, message);
    match node_id {
        Some(id) => e.at_node(id),
        None => e,
    }
}
