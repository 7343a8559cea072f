use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;

use crate::catalog::{NodeCatalog, SchemaResolver};
use crate::dsl::validation::{validate_compatibility, validate_semantics};
use crate::dsl::{
    parse_pipeline, DslFormat, PipelineDocument, ValidationError, ValidationErrorKind,
    ValidationReport,
};
use crate::error::PipelineError;
use crate::graph::DependencyGraph;

use super::compiled_pipeline::{
    CompiledPipeline, IrDependency, IrNode, IrNodeMetadata, PipelineMetadata,
};

const DEFAULT_VERSION: &str = "1.0.0";
const DATA_EDGE: &str = "data";

/// Compilation did not produce an IR. Carries every diagnostic collected.
#[derive(Debug, Clone, Error)]
#[error("Compilation failed with {} error(s)", .report.errors().len())]
pub struct CompileFailure {
    pub report: ValidationReport,
}

impl CompileFailure {
    pub fn errors(&self) -> Vec<&ValidationError> {
        self.report.errors()
    }
}

/// Compiles pipeline source into a [`CompiledPipeline`] against an injected catalog.
#[derive(Debug, Clone)]
pub struct PipelineCompiler {
    catalog: Arc<NodeCatalog>,
}

impl PipelineCompiler {
    pub fn new(catalog: Arc<NodeCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Arc<NodeCatalog> {
        &self.catalog
    }

    /// Run every phase and return the diagnostics without building an IR.
    pub fn validate(&self, content: &str, format: DslFormat) -> ValidationReport {
        match self.compile(content, format) {
            Ok(_) => ValidationReport::from_diagnostics(Vec::new()),
            Err(failure) => failure.report,
        }
    }

    /// Compile from source text.
    pub fn compile(&self, content: &str, format: DslFormat) -> Result<CompiledPipeline, CompileFailure> {
        let doc = parse_pipeline(content, format).map_err(|errors| CompileFailure {
            report: ValidationReport::from_diagnostics(errors),
        })?;
        self.compile_document(&doc)
    }

    /// Compile from a pre-parsed document.
    pub fn compile_document(&self, doc: &PipelineDocument) -> Result<CompiledPipeline, CompileFailure> {
        let mut report = ValidationReport::from_diagnostics(validate_semantics(doc, &self.catalog));
        if !report.is_valid {
            return Err(CompileFailure { report });
        }

        report.extend(validate_compatibility(doc, &self.catalog));
        let order = match DependencyGraph::from_declarations(&doc.nodes).topological_order() {
            Ok(order) => Some(order),
            Err(cycle) => {
                report.extend([cycle.to_validation_error()]);
                None
            }
        };
        let Some(order) = order.filter(|_| report.is_valid) else {
            tracing::debug!(errors = report.errors().len(), "pipeline rejected");
            return Err(CompileFailure { report });
        };

        compile_ir(doc, &self.catalog, &report, &order).map_err(|err| {
            let mut report = report.clone();
            report.extend([ValidationError::error(
                ValidationErrorKind::Semantic,
                "E900",
                err.to_string(),
            )]);
            CompileFailure { report }
        })
    }
}

/// Assemble the IR from already-validated declarations and their order.
///
/// Refuses to build when `report` still carries errors or `order` is not a
/// valid topological order; callers are expected to have checked both.
pub fn compile_ir(
    doc: &PipelineDocument,
    catalog: &NodeCatalog,
    report: &ValidationReport,
    order: &[String],
) -> Result<CompiledPipeline, PipelineError> {
    let outstanding = report.errors().len();
    if outstanding > 0 {
        return Err(PipelineError::InvalidPlan(format!(
            "cannot compile a pipeline with {} outstanding validation error(s)",
            outstanding
        )));
    }
    DependencyGraph::from_declarations(&doc.nodes)
        .check_order(order)
        .map_err(PipelineError::InvalidPlan)?;

    let mut resolver = SchemaResolver::new(doc, catalog);
    let mut nodes = Vec::with_capacity(doc.nodes.len());
    let mut dependencies = Vec::new();

    for (index, decl) in doc.nodes.iter().enumerate() {
        let contract = catalog.get(&decl.node_type).ok_or_else(|| {
            PipelineError::InvalidPlan(format!(
                "node '{}' has unknown type '{}'",
                decl.id, decl.node_type
            ))
        })?;

        let deps = decl.dependencies();
        for dep in &deps {
            dependencies.push(IrDependency {
                from: dep.to_string(),
                to: decl.id.clone(),
                edge_type: DATA_EDGE.to_string(),
                data_type: resolver.resolve(dep).shape,
            });
        }

        nodes.push(IrNode {
            id: decl.id.clone(),
            node_type: decl.node_type.clone(),
            runtime: contract.runtime,
            parameters: decl.parameters.clone(),
            input_schema: contract.input.resolve(&decl.parameters),
            output_schema: resolver.resolve(&decl.id),
            metadata: IrNodeMetadata {
                declaration_index: index,
                depends_on: deps.iter().map(|dep| dep.to_string()).collect(),
                description: contract.description.clone(),
            },
        });
    }

    let hash = hash_document(doc);
    let id = doc
        .id
        .clone()
        .unwrap_or_else(|| format!("pipeline-{:016x}", hash));

    tracing::info!(pipeline_id = %id, nodes = nodes.len(), "pipeline compiled");

    Ok(CompiledPipeline {
        id,
        name: doc.name.clone(),
        description: doc.description.clone(),
        version: doc
            .version
            .clone()
            .unwrap_or_else(|| DEFAULT_VERSION.to_string()),
        metadata: PipelineMetadata {
            compiled_at: Utc::now(),
            total_nodes: nodes.len(),
            has_circular_dependencies: false,
            source_hash: format!("{:016x}", hash),
        },
        nodes,
        dependencies,
        execution_order: order.to_vec(),
    })
}

fn hash_document(doc: &PipelineDocument) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    match serde_json::to_vec(doc) {
        Ok(bytes) => bytes.hash(&mut hasher),
        Err(_) => doc.nodes.len().hash(&mut hasher),
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DataShape;
    use crate::dsl::validation::validate_pipeline;
    use crate::dsl::NodeDeclaration;
    use serde_json::json;

    fn compiler() -> PipelineCompiler {
        PipelineCompiler::new(Arc::new(NodeCatalog::with_builtins()))
    }

    const ABC: &str = r#"
- id: A
  type: InlineDataNode
  params:
    rows: [{timestamp: 1, close: 1.0}]
- id: B
  type: IndicatorNode
  depends_on: [A]
  params: {indicator: SMA, period: 2}
- id: C
  type: AggregateNode
  depends_on: [B]
  params:
    aggregations: [{column: SMA_2, op: mean}]
"#;

    #[test]
    fn test_compile_chain() {
        let ir = compiler().compile(ABC, DslFormat::Yaml).unwrap();
        assert_eq!(ir.execution_order, vec!["A", "B", "C"]);
        assert_eq!(ir.metadata.total_nodes, 3);
        assert!(!ir.metadata.has_circular_dependencies);
        assert_eq!(ir.version, "1.0.0");
        assert_eq!(ir.dependencies.len(), 2);
        assert_eq!(ir.dependencies[0].data_type, DataShape::Dataframe);
        assert_eq!(ir.node("C").unwrap().output_schema.columns, vec!["SMA_2_mean"]);
    }

    #[test]
    fn test_compile_is_deterministic() {
        let c = compiler();
        let first = c.compile(ABC, DslFormat::Yaml).unwrap();
        let second = c.compile(ABC, DslFormat::Yaml).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.execution_order, second.execution_order);
        assert_eq!(first.dependencies, second.dependencies);
        assert_eq!(first.nodes, second.nodes);
        assert_eq!(first.metadata.source_hash, second.metadata.source_hash);
    }

    #[test]
    fn test_cycle_rejected() {
        let yaml = r#"
- id: A
  type: InlineDataNode
  params: {rows: []}
- id: B
  type: IndicatorNode
  depends_on: [C]
  params: {indicator: SMA, period: 2}
- id: C
  type: IndicatorNode
  depends_on: [B]
  params: {indicator: SMA, period: 3}
"#;
        let failure = compiler().compile(yaml, DslFormat::Yaml).unwrap_err();
        let cycle = failure.errors().into_iter().find(|e| e.code == "E101").unwrap();
        assert!(
            cycle.message.ends_with("B -> C -> B") || cycle.message.ends_with("C -> B -> C"),
            "{}",
            cycle.message
        );
    }

    #[test]
    fn test_compile_ir_refuses_outstanding_errors() {
        let doc = PipelineDocument::from_nodes(vec![NodeDeclaration::new("a", "InlineDataNode")
            .with_param("rows", json!([]))]);
        let report = ValidationReport::from_diagnostics(vec![ValidationError::error(
            ValidationErrorKind::Semantic,
            "E999",
            "x",
        )]);
        let err = compile_ir(&doc, &NodeCatalog::with_builtins(), &report, &["a".into()]).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidPlan(_)));
    }

    #[test]
    fn test_compile_ir_refuses_bad_order() {
        let doc = PipelineDocument::from_nodes(vec![
            NodeDeclaration::new("a", "InlineDataNode").with_param("rows", json!([])),
            NodeDeclaration::new("b", "IndicatorNode")
                .with_deps(["a"])
                .with_param("indicator", json!("SMA"))
                .with_param("period", json!(2)),
        ]);
        let report = ValidationReport::from_diagnostics(Vec::new());
        let err = compile_ir(
            &doc,
            &NodeCatalog::with_builtins(),
            &report,
            &["b".into(), "a".into()],
        )
        .unwrap_err();
        assert!(err.to_string().contains("before its dependency"));
    }

    #[test]
    fn test_ir_json_shape() {
        let ir = compiler().compile(ABC, DslFormat::Yaml).unwrap();
        let v = serde_json::to_value(&ir).unwrap();
        assert!(v["metadata"]["compiledAt"].is_string());
        assert_eq!(v["metadata"]["totalNodes"], 3);
        assert_eq!(v["nodes"][1]["type"], "IndicatorNode");
        assert_eq!(v["nodes"][1]["runtime"], "builtin");
        assert_eq!(v["dependencies"][0]["type"], "data");
        assert_eq!(v["dependencies"][0]["dataType"], "dataframe");
        assert_eq!(v["executionOrder"][2], "C");
        let back = CompiledPipeline::from_json(&ir.to_json_pretty().unwrap()).unwrap();
        assert_eq!(back.execution_order, ir.execution_order);
    }

    #[test]
    fn test_repeated_dependency_counts_once() {
        let yaml = r#"
- id: A
  type: InlineDataNode
  params:
    rows: [{timestamp: 1, close: 1.0}]
- id: B
  type: IndicatorNode
  depends_on: [A, A]
  params: {indicator: SMA, period: 2}
"#;
        let c = compiler();
        let report = validate_pipeline(yaml, DslFormat::Yaml, c.catalog());
        assert!(report.is_valid, "{:?}", report.diagnostics);
        let codes: Vec<&str> = report.warnings().iter().map(|d| d.code.as_str()).collect();
        assert_eq!(codes, vec!["W001"]);

        let ir = c.compile(yaml, DslFormat::Yaml).unwrap();
        assert_eq!(ir.dependencies.len(), 1);
        assert_eq!(ir.node("B").unwrap().metadata.depends_on, vec!["A"]);
    }

    #[test]
    fn test_validate_returns_report() {
        let report = compiler().validate("[]", DslFormat::Json);
        assert!(!report.is_valid);
        assert_eq!(report.errors()[0].code, "E003");
    }
}
