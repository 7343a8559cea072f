//! Dependency graph, deterministic topological ordering and cycle reporting.
//!
//! Edges point from a dependency to its dependent. Ties between ready nodes
//! are broken by declaration order, so the same document always yields the
//! same execution order.

use std::collections::{HashMap, VecDeque};

use thiserror::Error;

use crate::dsl::{NodeDeclaration, ValidationError, ValidationErrorKind};

/// A dependency cycle, as the sequence of ids walked around it.
///
/// The first and last ids are equal and every consecutive pair is an edge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Circular dependency detected: {}", .path.join(" -> "))]
pub struct CycleError {
    pub path: Vec<String>,
}

impl CycleError {
    pub fn to_validation_error(&self) -> ValidationError {
        let e = ValidationError::error(ValidationErrorKind::Dependency, "E101", self.to_string());
        match self.path.first() {
            Some(id) => e.at_node(id).at_field("depends_on"),
            None => e,
        }
    }
}

/// Adjacency and in-degree structure over node ids in declaration order.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    ids: Vec<String>,
    index: HashMap<String, usize>,
    successors: Vec<Vec<usize>>,
    predecessors: Vec<Vec<usize>>,
}

impl DependencyGraph {
    /// Build from declarations. Dependencies on unknown ids are ignored.
    pub fn from_declarations(nodes: &[NodeDeclaration]) -> Self {
        Self::from_parts(
            nodes.iter().map(|n| n.id.clone()),
            nodes.iter().flat_map(|n| {
                n.dependencies()
                    .into_iter()
                    .map(move |dep| (dep.to_string(), n.id.clone()))
            }),
        )
    }

    /// Build from ids (declaration order) and `(from, to)` edges.
    pub fn from_parts<I, E>(ids: I, edges: E) -> Self
    where
        I: IntoIterator<Item = String>,
        E: IntoIterator<Item = (String, String)>,
    {
        let mut graph = DependencyGraph::default();
        for id in ids {
            if graph.index.contains_key(&id) {
                continue;
            }
            graph.index.insert(id.clone(), graph.ids.len());
            graph.ids.push(id);
            graph.successors.push(Vec::new());
            graph.predecessors.push(Vec::new());
        }
        for (from, to) in edges {
            let (Some(&f), Some(&t)) = (graph.index.get(&from), graph.index.get(&to)) else {
                continue;
            };
            if graph.successors[f].contains(&t) {
                continue;
            }
            graph.successors[f].push(t);
            graph.predecessors[t].push(f);
        }
        // Successors are visited in the dependents' declaration order.
        for succ in &mut graph.successors {
            succ.sort_unstable();
        }
        graph
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn successors(&self, id: &str) -> Vec<&str> {
        self.neighbours(id, &self.successors)
    }

    pub fn predecessors(&self, id: &str) -> Vec<&str> {
        self.neighbours(id, &self.predecessors)
    }

    fn neighbours<'a>(&'a self, id: &str, table: &'a [Vec<usize>]) -> Vec<&'a str> {
        self.index
            .get(id)
            .map(|&i| table[i].iter().map(|&j| self.ids[j].as_str()).collect())
            .unwrap_or_default()
    }

    /// Kahn's algorithm with a FIFO queue seeded in declaration order.
    pub fn topological_order(&self) -> Result<Vec<String>, CycleError> {
        let mut in_degree: Vec<usize> = self.predecessors.iter().map(Vec::len).collect();
        let mut queue: VecDeque<usize> = (0..self.ids.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.ids.len());

        while let Some(node) = queue.pop_front() {
            order.push(self.ids[node].clone());
            for &next in &self.successors[node] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        if order.len() < self.ids.len() {
            let path = self.find_cycle().unwrap_or_else(|| {
                (0..self.ids.len())
                    .filter(|&i| in_degree[i] > 0)
                    .map(|i| self.ids[i].clone())
                    .collect()
            });
            return Err(CycleError { path });
        }
        Ok(order)
    }

    /// Depth-first search tracking the current path on an explicit stack,
    /// so graph depth is bounded by memory rather than the thread stack.
    ///
    /// Returns the first cycle found, starting nodes in declaration order.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        const NEW: u8 = 0;
        const ON_PATH: u8 = 1;
        const DONE: u8 = 2;

        let mut state = vec![NEW; self.ids.len()];
        // (node, index of its next successor to visit)
        let mut path: Vec<(usize, usize)> = Vec::new();
        for start in 0..self.ids.len() {
            if state[start] != NEW {
                continue;
            }
            state[start] = ON_PATH;
            path.push((start, 0));

            while let Some(frame) = path.last_mut() {
                let (node, cursor) = *frame;
                let Some(&next) = self.successors[node].get(cursor) else {
                    state[node] = DONE;
                    path.pop();
                    continue;
                };
                frame.1 += 1;
                match state[next] {
                    NEW => {
                        state[next] = ON_PATH;
                        path.push((next, 0));
                    }
                    ON_PATH => {
                        if let Some(pos) = path.iter().position(|&(n, _)| n == next) {
                            let mut cycle: Vec<String> =
                                path[pos..].iter().map(|&(n, _)| self.ids[n].clone()).collect();
                            cycle.push(self.ids[next].clone());
                            return Some(cycle);
                        }
                    }
                    _ => {}
                }
            }
        }
        None
    }

    /// Check that `order` is a permutation of the graph's ids that respects every edge.
    pub fn check_order(&self, order: &[String]) -> Result<(), String> {
        if order.len() != self.ids.len() {
            return Err(format!(
                "execution order has {} entries for {} nodes",
                order.len(),
                self.ids.len()
            ));
        }
        let mut position = vec![usize::MAX; self.ids.len()];
        for (pos, id) in order.iter().enumerate() {
            let Some(&i) = self.index.get(id) else {
                return Err(format!("execution order names unknown node '{}'", id));
            };
            if position[i] != usize::MAX {
                return Err(format!("execution order lists '{}' twice", id));
            }
            position[i] = pos;
        }
        for (from, succ) in self.successors.iter().enumerate() {
            for &to in succ {
                if position[from] > position[to] {
                    return Err(format!(
                        "'{}' is ordered before its dependency '{}'",
                        self.ids[to], self.ids[from]
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(nodes: &[(&str, &[&str])]) -> DependencyGraph {
        let decls: Vec<NodeDeclaration> = nodes
            .iter()
            .map(|(id, deps)| NodeDeclaration::new(*id, "T").with_deps(deps.iter().copied()))
            .collect();
        DependencyGraph::from_declarations(&decls)
    }

    #[test]
    fn test_chain_order() {
        let g = graph(&[("A", &[]), ("B", &["A"]), ("C", &["B"])]);
        assert_eq!(g.topological_order().unwrap(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_ties_follow_declaration_order() {
        let g = graph(&[
            ("z", &[]),
            ("a", &[]),
            ("m", &["z", "a"]),
            ("b", &["a"]),
            ("c", &["z"]),
        ]);
        assert_eq!(g.topological_order().unwrap(), vec!["z", "a", "c", "m", "b"]);
    }

    #[test]
    fn test_declared_out_of_order() {
        let g = graph(&[("C", &["B"]), ("B", &["A"]), ("A", &[])]);
        assert_eq!(g.topological_order().unwrap(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_two_node_cycle_path() {
        let g = graph(&[("A", &[]), ("B", &["C"]), ("C", &["B"])]);
        let err = g.topological_order().unwrap_err();
        assert_eq!(err.path, vec!["B", "C", "B"]);
        assert_eq!(err.to_string(), "Circular dependency detected: B -> C -> B");
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let g = graph(&[("A", &["A"])]);
        assert_eq!(g.topological_order().unwrap_err().path, vec!["A", "A"]);
    }

    #[test]
    fn test_very_deep_cycle() {
        const DEPTH: usize = 200_000;
        let ids = (0..DEPTH).map(|i| format!("n{}", i));
        let edges = (1..DEPTH)
            .map(|i| (format!("n{}", i - 1), format!("n{}", i)))
            .chain(std::iter::once((format!("n{}", DEPTH - 1), "n0".to_string())));
        let g = DependencyGraph::from_parts(ids, edges);
        let path = g.find_cycle().unwrap();
        assert_eq!(path.len(), DEPTH + 1);
        assert_eq!(path.first().map(String::as_str), Some("n0"));
        assert_eq!(path.first(), path.last());
    }

    #[test]
    fn test_cycle_behind_acyclic_prefix() {
        let g = graph(&[("A", &[]), ("B", &["A", "D"]), ("C", &["B"]), ("D", &["C"])]);
        let path = g.find_cycle().unwrap();
        assert_eq!(path.first(), path.last());
        for pair in path.windows(2) {
            assert!(g.successors(&pair[0]).contains(&pair[1].as_str()));
        }
    }

    #[test]
    fn test_unknown_dependencies_ignored() {
        let g = graph(&[("A", &["ghost"])]);
        assert_eq!(g.topological_order().unwrap(), vec!["A"]);
        assert!(g.predecessors("A").is_empty());
    }

    #[test]
    fn test_check_order() {
        let g = graph(&[("A", &[]), ("B", &["A"])]);
        assert!(g.check_order(&["A".into(), "B".into()]).is_ok());
        assert!(g.check_order(&["B".into(), "A".into()]).is_err());
        assert!(g.check_order(&["A".into()]).is_err());
        assert!(g.check_order(&["A".into(), "A".into()]).is_err());
        assert!(g.check_order(&["A".into(), "X".into()]).is_err());
    }

    #[test]
    fn test_cycle_error_as_validation_error() {
        let err = CycleError {
            path: vec!["B".into(), "C".into(), "B".into()],
        };
        let v = err.to_validation_error();
        assert_eq!(v.code, "E101");
        assert_eq!(v.node_id.as_deref(), Some("B"));
    }
}
