use crate::catalog::{NodeCatalog, SchemaResolver};
use crate::dsl::schema::PipelineDocument;

use super::types::{ValidationError, ValidationErrorKind};

/// Check every node's inputs against the schemas its dependencies produce.
///
/// Assumes semantic validation passed: every type resolves and every
/// dependency target exists.
pub fn validate(doc: &PipelineDocument, catalog: &NodeCatalog) -> Vec<ValidationError> {
    let mut diags = Vec::new();
    let mut resolver = SchemaResolver::new(doc, catalog);

    for node in &doc.nodes {
        let Some(contract) = catalog.get(&node.node_type) else {
            continue;
        };
        let input = &contract.input;
        let deps = node.dependencies();
        let count = deps.len();

        if input.arity.is_source() {
            if count > 0 {
                diags.push(
                    ValidationError::error(
                        ValidationErrorKind::Dependency,
                        "E302",
                        format!(
                            "Source node '{}' ({}) takes no inputs but depends on: {}",
                            node.id,
                            node.node_type,
                            deps.join(", ")
                        ),
                    )
                    .at_node(&node.id)
                    .at_field("depends_on"),
                );
            }
            continue;
        }

        if !input.arity.contains(count) {
            diags.push(
                ValidationError::error(
                    ValidationErrorKind::TypeCompatibility,
                    "E301",
                    format!(
                        "Node '{}' ({}) expects {} input(s), found {}",
                        node.id, node.node_type, input.arity, count
                    ),
                )
                .at_node(&node.id)
                .at_field("depends_on"),
            );
        }

        let mut available: Vec<String> = Vec::new();
        let mut columns_known = true;
        let mut tabular_inputs = 0;
        for (i, dep) in deps.iter().enumerate() {
            let produced = resolver.resolve(dep);
            if !input.accepts(produced.shape) {
                let expected: Vec<&str> = input.accepted.iter().map(|s| s.as_str()).collect();
                diags.push(
                    ValidationError::error(
                        ValidationErrorKind::TypeCompatibility,
                        "E303",
                        format!(
                            "Node '{}' expects {} input, but '{}' produces {}",
                            node.id,
                            expected.join(" or "),
                            dep,
                            produced.shape
                        ),
                    )
                    .at_node(&node.id)
                    .at_field(format!("depends_on[{}]", i)),
                );
                continue;
            }
            if produced.open {
                columns_known = false;
            }
            tabular_inputs += 1;
            available.extend(produced.columns);
        }

        let required = input.required_columns.resolve(&node.parameters);
        if !columns_known || tabular_inputs == 0 || required.is_empty() {
            continue;
        }
        let missing: Vec<&str> = required
            .iter()
            .filter(|col| !available.contains(col))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            diags.push(
                ValidationError::error(
                    ValidationErrorKind::Schema,
                    "E304",
                    format!(
                        "Input of node '{}' is missing required column(s): {} (provided by {})",
                        node.id,
                        missing.join(", "),
                        deps.join(", ")
                    ),
                )
                .at_node(&node.id)
                .at_field("depends_on"),
            );
        }
    }

    diags
}
