use std::collections::HashSet;

use crate::catalog::NodeCatalog;
use crate::dsl::schema::PipelineDocument;

use super::types::{ValidationError, ValidationErrorKind};

/// Parameter presence, kind checks and per-type rules.
///
/// Rule functions only run for a node whose required parameters are all
/// present and correctly typed.
pub fn validate(
    doc: &PipelineDocument,
    catalog: &NodeCatalog,
    skip: &HashSet<String>,
) -> Vec<ValidationError> {
    let mut diags = Vec::new();

    for node in &doc.nodes {
        if skip.contains(&node.id) {
            continue;
        }
        let Some(contract) = catalog.get(&node.node_type) else {
            continue;
        };

        let before = diags.len();
        for spec in &contract.required_params {
            if !node.parameters.contains_key(&spec.name) {
                diags.push(
                    ValidationError::error(
                        ValidationErrorKind::Parameter,
                        "E201",
                        format!(
                            "Missing required parameter '{}' for {} node '{}'",
                            spec.name, node.node_type, node.id
                        ),
                    )
                    .at_node(&node.id)
                    .at_field(format!("params.{}", spec.name)),
                );
            }
        }

        for (key, value) in &node.parameters {
            match contract.param_spec(key) {
                Some(spec) if !spec.kind.matches(value) => diags.push(
                    ValidationError::error(
                        ValidationErrorKind::Parameter,
                        "E202",
                        format!(
                            "Parameter '{}' of node '{}' must be {}, found {}",
                            key,
                            node.id,
                            spec.kind.as_str(),
                            value
                        ),
                    )
                    .at_node(&node.id)
                    .at_field(format!("params.{}", key)),
                ),
                Some(_) => {}
                None => diags.push(
                    ValidationError::warning(
                        ValidationErrorKind::Parameter,
                        "W201",
                        format!(
                            "Unknown parameter '{}' for {} node '{}'",
                            key, node.node_type, node.id
                        ),
                    )
                    .at_node(&node.id)
                    .at_field(format!("params.{}", key)),
                ),
            }
        }

        let has_param_errors = diags[before..].iter().any(ValidationError::is_error);
        if !has_param_errors {
            for rule in &contract.rules {
                diags.extend(rule(node));
            }
        }
    }

    diags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{NodeTypeContract, ParamKind, RuntimeKind};
    use crate::dsl::schema::NodeDeclaration;
    use crate::dsl::validation::Severity;
    use serde_json::json;

    fn catalog_with_ab() -> NodeCatalog {
        let mut catalog = NodeCatalog::new();
        catalog.register(
            NodeTypeContract::new("AB", RuntimeKind::Builtin)
                .required("a", ParamKind::Integer)
                .required("b", ParamKind::String)
                .optional("c", ParamKind::Boolean),
        );
        catalog
    }

    #[test]
    fn test_single_missing_param_yields_exactly_one_error() {
        let catalog = catalog_with_ab();
        let doc = PipelineDocument::from_nodes(vec![NodeDeclaration::new("n", "AB")
            .with_param("a", json!(1))
            .with_param("c", json!(true))]);
        let diags = validate(&doc, &catalog, &HashSet::new());
        let errors: Vec<_> = diags.iter().filter(|d| d.is_error()).collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ValidationErrorKind::Parameter);
        assert!(errors[0].message.contains("'b'"));
        assert_eq!(errors[0].field_path.as_deref(), Some("params.b"));
    }

    #[test]
    fn test_wrong_kind() {
        let catalog = catalog_with_ab();
        let doc = PipelineDocument::from_nodes(vec![NodeDeclaration::new("n", "AB")
            .with_param("a", json!("one"))
            .with_param("b", json!("x"))]);
        let diags = validate(&doc, &catalog, &HashSet::new());
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, "E202");
        assert!(diags[0].message.contains("integer"));
    }

    #[test]
    fn test_unknown_param_is_warning() {
        let catalog = catalog_with_ab();
        let doc = PipelineDocument::from_nodes(vec![NodeDeclaration::new("n", "AB")
            .with_param("a", json!(1))
            .with_param("b", json!("x"))
            .with_param("colour", json!("red"))]);
        let diags = validate(&doc, &catalog, &HashSet::new());
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].severity, Severity::Warning);
    }

    #[test]
    fn test_rules_run_only_without_param_errors() {
        let catalog = NodeCatalog::with_builtins();
        let bad_period = NodeDeclaration::new("i", "IndicatorNode")
            .with_param("indicator", json!("WMA"))
            .with_param("period", json!(0));
        let missing = NodeDeclaration::new("j", "IndicatorNode").with_param("indicator", json!("WMA"));
        let doc = PipelineDocument::from_nodes(vec![bad_period, missing]);
        let diags = validate(&doc, &catalog, &HashSet::new());
        let for_i: Vec<_> = diags.iter().filter(|d| d.node_id.as_deref() == Some("i")).collect();
        let for_j: Vec<_> = diags.iter().filter(|d| d.node_id.as_deref() == Some("j")).collect();
        assert_eq!(for_i.len(), 2, "enum and range rules");
        assert_eq!(for_j.len(), 1, "only the missing period");
        assert_eq!(for_j[0].code, "E201");
    }

    #[test]
    fn test_skipped_nodes_are_ignored() {
        let catalog = catalog_with_ab();
        let doc = PipelineDocument::from_nodes(vec![NodeDeclaration::new("n", "AB")]);
        let skip: HashSet<String> = ["n".to_string()].into_iter().collect();
        assert!(validate(&doc, &catalog, &skip).is_empty());
    }
}
