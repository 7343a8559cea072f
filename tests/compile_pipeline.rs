use std::collections::HashMap;
use std::sync::Arc;

use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graph::DiGraph;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use xpipeline::dsl::NodeDeclaration;
use xpipeline::{DependencyGraph, DslFormat, NodeCatalog, PipelineCompiler, RuntimeKind};

const STRATEGY: &str = r#"
id: ma-crossover
name: MA crossover on BTC
nodes:
  - id: load
    type: DataLoaderNode
    params: {symbol: BTCUSDT, timeframe: 1h, dataset: btc.csv}
  - id: fast
    type: IndicatorNode
    depends_on: [load]
    params: {indicator: SMA, period: 10}
  - id: slow
    type: IndicatorNode
    depends_on: [load]
    params: {indicator: SMA, period: 30}
  - id: signals
    type: CrossoverSignalNode
    depends_on: [fast, slow]
    params: {fast_ma_column: SMA_10, slow_ma_column: SMA_30}
  - id: backtest
    type: BacktestNode
    depends_on: [signals]
    params: {initial_capital: 10000}
"#;

fn compiler() -> PipelineCompiler {
    PipelineCompiler::new(Arc::new(NodeCatalog::with_builtins()))
}

#[test]
fn test_strategy_pipeline_compiles_to_ir() {
    let plan = compiler().compile(STRATEGY, DslFormat::Yaml).unwrap();
    assert_eq!(plan.id, "ma-crossover");
    assert_eq!(plan.execution_order, vec!["load", "fast", "slow", "signals", "backtest"]);
    assert_eq!(plan.metadata.total_nodes, 5);
    assert!(!plan.metadata.has_circular_dependencies);
    assert_eq!(plan.dependencies.len(), 5);

    let load = plan.node("load").unwrap();
    assert_eq!(load.runtime, RuntimeKind::Python);
    let signals = plan.node("signals").unwrap();
    assert_eq!(signals.runtime, RuntimeKind::Builtin);
    assert_eq!(plan.dependencies_of("signals"), ["fast", "slow"]);
    assert!(plan.node("backtest").unwrap().output_schema.columns.contains(&"equity_curve".to_string()));
}

#[test]
fn test_same_source_same_ir() {
    let a = compiler().compile(STRATEGY, DslFormat::Yaml).unwrap();
    let b = compiler().compile(STRATEGY, DslFormat::Yaml).unwrap();
    assert_eq!(a.metadata.source_hash, b.metadata.source_hash);
    assert_eq!(a.nodes, b.nodes);
    assert_eq!(a.execution_order, b.execution_order);
}

#[test]
fn test_missing_column_is_reported_with_node() {
    let broken = STRATEGY.replace("fast_ma_column: SMA_10", "fast_ma_column: SMA_15");
    let failure = compiler().compile(&broken, DslFormat::Yaml).unwrap_err();
    let errors = failure.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code, "E304");
    assert_eq!(errors[0].node_id.as_deref(), Some("signals"));
    assert!(errors[0].message.contains("SMA_15"));
}

#[test]
fn test_cycle_reported_as_path() {
    let yaml = r#"
- {id: A, type: InlineDataNode, params: {rows: [{close: 1}]}}
- {id: B, type: IndicatorNode, depends_on: [A, D], params: {indicator: SMA, period: 2}}
- {id: C, type: IndicatorNode, depends_on: [B], params: {indicator: SMA, period: 3}}
- {id: D, type: IndicatorNode, depends_on: [C], params: {indicator: SMA, period: 4}}
"#;
    let report = compiler().validate(yaml, DslFormat::Yaml);
    assert!(!report.is_valid);
    let cycle: Vec<_> = report.errors().into_iter().filter(|e| e.code == "E101").collect();
    assert_eq!(cycle.len(), 1);
    assert!(cycle[0].message.contains("B -> C -> D -> B"), "{}", cycle[0].message);
}

#[test]
fn test_all_formats_agree() {
    let json = r#"[
        {"id": "rows", "type": "InlineDataNode", "params": {"rows": [{"close": 1.0}]}},
        {"id": "sma", "type": "IndicatorNode", "depends_on": ["rows"], "params": {"indicator": "SMA", "period": 2}}
    ]"#;
    let toml = r#"
[[nodes]]
id = "rows"
type = "InlineDataNode"
params = { rows = [{ close = 1.0 }] }

[[nodes]]
id = "sma"
type = "IndicatorNode"
depends_on = ["rows"]
params = { indicator = "SMA", period = 2 }
"#;
    let from_json = compiler().compile(json, DslFormat::Json).unwrap();
    let from_toml = compiler().compile(toml, DslFormat::Toml).unwrap();
    assert_eq!(from_json.execution_order, from_toml.execution_order);
    assert_eq!(from_json.nodes, from_toml.nodes);
}

/// Random DAG in shuffled declaration order: edges only go from lower to higher rank.
fn random_dag(rng: &mut StdRng, n: usize, density: f64) -> Vec<NodeDeclaration> {
    let mut ranks: Vec<usize> = (0..n).collect();
    ranks.shuffle(rng);
    let mut nodes: Vec<NodeDeclaration> = (0..n)
        .map(|i| NodeDeclaration::new(format!("n{}", i), "InlineDataNode"))
        .collect();
    for to in 0..n {
        let deps: Vec<String> = (0..n)
            .filter(|&from| ranks[from] < ranks[to] && rng.gen_bool(density))
            .map(|from| format!("n{}", from))
            .collect();
        nodes[to] = nodes[to].clone().with_deps(deps);
    }
    nodes.shuffle(rng);
    nodes
}

fn petgraph_of(nodes: &[NodeDeclaration]) -> DiGraph<String, ()> {
    let mut graph = DiGraph::new();
    let index: HashMap<&str, _> = nodes
        .iter()
        .map(|n| (n.id.as_str(), graph.add_node(n.id.clone())))
        .collect();
    for node in nodes {
        for dep in &node.depends_on {
            graph.add_edge(index[dep.as_str()], index[node.id.as_str()], ());
        }
    }
    graph
}

#[test]
fn test_random_dags_order_matches_reference() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for round in 0..200 {
        let n = rng.gen_range(1..40);
        let nodes = random_dag(&mut rng, n, 0.15);
        let graph = DependencyGraph::from_declarations(&nodes);
        let order = graph.topological_order().unwrap();

        let reference = petgraph_of(&nodes);
        assert!(toposort(&reference, None).is_ok());
        assert_eq!(order.len(), n, "round {}", round);

        let position: HashMap<&str, usize> = order.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();
        for node in &nodes {
            for dep in &node.depends_on {
                assert!(position[dep.as_str()] < position[node.id.as_str()], "round {}", round);
            }
        }
        assert!(graph.check_order(&order).is_ok());
        assert_eq!(graph.topological_order().unwrap(), order);
    }
}

#[test]
fn test_random_cycles_are_found_with_real_edges() {
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..100 {
        let n = rng.gen_range(2..30);
        let mut nodes = random_dag(&mut rng, n, 0.2);
        // Close a loop: the first node gains a dependency on something downstream of it.
        let order = DependencyGraph::from_declarations(&nodes).topological_order().unwrap();
        let (first, last) = (order[0].clone(), order[order.len() - 1].clone());
        let target = nodes.iter().position(|d| d.id == first).unwrap();
        nodes[target].depends_on.push(last.clone());
        let chain_start = nodes.iter().position(|d| d.id == last).unwrap();
        if !nodes[chain_start].depends_on.contains(&first) {
            nodes[chain_start].depends_on.push(first.clone());
        }

        assert!(is_cyclic_directed(&petgraph_of(&nodes)));
        let err = DependencyGraph::from_declarations(&nodes).topological_order().unwrap_err();
        assert!(err.path.len() >= 2);
        assert_eq!(err.path.first(), err.path.last());
        let deps: HashMap<&str, &Vec<String>> = nodes.iter().map(|d| (d.id.as_str(), &d.depends_on)).collect();
        for pair in err.path.windows(2) {
            // Edge pair[0] -> pair[1] means pair[1] depends on pair[0].
            assert!(deps[pair[1].as_str()].contains(&pair[0]), "{:?}", err.path);
        }
    }
}
