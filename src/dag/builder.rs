//! Task dependency graph.
//!
//! The builder collects task keys and "must complete before" edges. Unlike a
//! strict DAG constructor it never rejects a graph: cycles are reported by
//! [`TaskGraph::cyclic_nodes`] so callers can exclude the affected tasks and
//! keep going.

use crate::dag::reference::TaskKey;
use std::collections::{BTreeSet, HashMap};

/// Index into the node list.
type NodeIndex = usize;

/// A directed graph of tasks.
#[derive(Debug, Default)]
pub struct TaskGraph {
    nodes: Vec<TaskKey>,
    index_map: HashMap<TaskKey, NodeIndex>,
    /// index -> tasks that depend on it
    forward_edges: Vec<Vec<NodeIndex>>,
    /// index -> tasks it depends on
    reverse_edges: Vec<Vec<NodeIndex>>,
}

impl TaskGraph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn index_of(&self, key: &TaskKey) -> Option<NodeIndex> {
        self.index_map.get(key).copied()
    }

    /// Tasks that depend on the given task.
    fn dependents(&self, index: NodeIndex) -> &[NodeIndex] {
        self.forward_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    /// Tasks left over after Kahn's algorithm: members of a cycle and every
    /// task that can only be reached through one.
    pub fn cyclic_nodes(&self) -> BTreeSet<TaskKey> {
        let depths = self.depths();
        self.nodes
            .iter()
            .zip(depths)
            .filter(|(_, depth)| depth.is_none())
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Group acyclic tasks into waves by longest dependency chain.
    ///
    /// Wave 0 holds tasks with no in-graph dependencies; wave `n` holds tasks
    /// whose deepest dependency sits in wave `n - 1`. Tasks inside a wave are
    /// sorted. Cyclic tasks are left out.
    pub fn waves(&self) -> Vec<Vec<TaskKey>> {
        let mut waves: Vec<Vec<TaskKey>> = Vec::new();
        for (key, depth) in self.nodes.iter().zip(self.depths()) {
            if let Some(depth) = depth {
                if waves.len() <= depth {
                    waves.resize_with(depth + 1, Vec::new);
                }
                waves[depth].push(key.clone());
            }
        }
        for wave in &mut waves {
            wave.sort();
        }
        waves
    }

    /// Longest-path depth of every node, `None` for nodes Kahn's algorithm
    /// cannot drain.
    fn depths(&self) -> Vec<Option<usize>> {
        let mut in_degree: Vec<usize> = self.reverse_edges.iter().map(|deps| deps.len()).collect();
        let mut depth: Vec<Option<usize>> = vec![None; self.len()];

        let mut queue: Vec<NodeIndex> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, deg)| *deg == 0)
            .map(|(i, _)| i)
            .collect();
        for &root in &queue {
            depth[root] = Some(0);
        }

        while let Some(node) = queue.pop() {
            let next_depth = depth[node].unwrap_or(0) + 1;
            for &dependent in self.dependents(node) {
                depth[dependent] = Some(depth[dependent].map_or(next_depth, |d| d.max(next_depth)));
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push(dependent);
                }
            }
        }

        // Nodes with remaining in-degree were touched by a drained parent but
        // never fully released.
        for (i, deg) in in_degree.iter().enumerate() {
            if *deg > 0 {
                depth[i] = None;
            }
        }
        depth
    }
}

/// Builder for task graphs.
#[derive(Debug, Default)]
pub struct DagBuilder {
    nodes: Vec<TaskKey>,
    edges: Vec<(TaskKey, TaskKey)>,
}

impl DagBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task node. Duplicates collapse into one node in [`Self::build`].
    pub fn add_task(&mut self, key: TaskKey) -> &mut Self {
        self.nodes.push(key);
        self
    }

    /// Record that `dependency` must complete before `dependent`.
    pub fn add_dependency(&mut self, dependency: TaskKey, dependent: TaskKey) -> &mut Self {
        self.edges.push((dependency, dependent));
        self
    }

    /// Build the graph. Edges touching unknown tasks are dropped.
    pub fn build(self) -> TaskGraph {
        let mut graph = TaskGraph::default();
        for key in self.nodes {
            if graph.index_map.contains_key(&key) {
                continue;
            }
            graph.index_map.insert(key.clone(), graph.nodes.len());
            graph.nodes.push(key);
        }

        graph.forward_edges = vec![Vec::new(); graph.nodes.len()];
        graph.reverse_edges = vec![Vec::new(); graph.nodes.len()];

        for (dependency, dependent) in self.edges {
            let (Some(from), Some(to)) = (graph.index_of(&dependency), graph.index_of(&dependent))
            else {
                continue;
            };
            if graph.forward_edges[from].contains(&to) {
                continue;
            }
            graph.forward_edges[from].push(to);
            graph.reverse_edges[to].push(from);
        }

        graph
    }
}
