use std::collections::HashMap;

use petgraph::algo::tarjan_scc;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::Direction;
use semver::Version;

use crate::error::GraphError;

/// A node in the graph: one installed `(name, version)` pair.
#[derive(Debug, Clone)]
struct VersionNode {
    name: String,
    version: Version,
    /// True if this version was installed directly (not only pulled in as a
    /// dependency of another plugin).
    top_level: bool,
}

fn key(name: &str, version: &Version) -> (String, String) {
    (name.to_string(), version.to_string())
}

/// Tracks which `(name, version)` pairs are installed and why they're still
/// referenced.
///
/// Edges run from a plugin to the exact version of a dependency it resolved
/// to, labelled with the dependency name as declared in the plugin's
/// manifest (its own package name may legitimately differ from that key in
/// pathological manifests, so the label is kept rather than re-derived).
///
/// A node's reference count is its in-degree plus one if it is top-level.
/// `sweep` removes every node whose reference count has reached zero,
/// cascading through that node's own outgoing edges.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    graph: StableDiGraph<VersionNode, String>,
    index_of: HashMap<(String, String), NodeIndex>,
}

impl DependencyGraph {
    /// An empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self { graph: StableDiGraph::new(), index_of: HashMap::new() }
    }

    fn ensure_node(&mut self, name: &str, version: &Version) -> NodeIndex {
        let k = key(name, version);
        if let Some(&idx) = self.index_of.get(&k) {
            return idx;
        }
        let idx = self.graph.add_node(VersionNode {
            name: name.to_string(),
            version: version.clone(),
            top_level: false,
        });
        self.index_of.insert(k, idx);
        idx
    }

    /// Marks `(name, version)` as a top-level install, creating the node if
    /// it doesn't exist yet.
    pub fn mark_top_level(&mut self, name: &str, version: &Version) {
        let idx = self.ensure_node(name, version);
        self.graph[idx].top_level = true;
    }

    /// Records that `(plugin_name, plugin_version)` resolved `dep_name` to
    /// `dep_version`. Both nodes are created if absent.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::CircularDependency`] if the new edge would close
    /// a cycle.
    pub fn link(
        &mut self,
        plugin_name: &str,
        plugin_version: &Version,
        dep_name: &str,
        dep_version: &Version,
    ) -> Result<(), GraphError> {
        let from = self.ensure_node(plugin_name, plugin_version);
        let to = self.ensure_node(dep_name, dep_version);

        if self.graph.find_edge(from, to).is_some() {
            return Ok(());
        }
        let edge = self.graph.add_edge(from, to, dep_name.to_string());

        if let Some(cycle) = self.find_cycle_through(from) {
            self.graph.remove_edge(edge);
            return Err(GraphError::CircularDependency { cycle });
        }
        Ok(())
    }

    fn find_cycle_through(&self, start: NodeIndex) -> Option<Vec<String>> {
        let sccs = tarjan_scc(&self.graph);
        for scc in sccs {
            if scc.len() > 1 && scc.contains(&start) {
                return Some(
                    scc.iter()
                        .map(|&idx| {
                            let node = &self.graph[idx];
                            format!("{}@{}", node.name, node.version)
                        })
                        .collect(),
                );
            }
        }
        None
    }

    /// The reference count of `(name, version)`: incoming edges plus one if
    /// it is a top-level install. Zero for a version not present in the
    /// graph at all.
    #[must_use]
    pub fn refcount(&self, name: &str, version: &Version) -> usize {
        let Some(&idx) = self.index_of.get(&key(name, version)) else { return 0 };
        let in_degree = self.graph.neighbors_directed(idx, Direction::Incoming).count();
        in_degree + usize::from(self.graph[idx].top_level)
    }

    /// True if `(name, version)` is marked top-level.
    #[must_use]
    pub fn is_top_level(&self, name: &str, version: &Version) -> bool {
        self.index_of
            .get(&key(name, version))
            .map(|&idx| self.graph[idx].top_level)
            .unwrap_or(false)
    }

    /// The version `(plugin_name, plugin_version)` resolved `dep_name` to, if
    /// that link has been recorded.
    #[must_use]
    pub fn resolved_version_of(
        &self,
        plugin_name: &str,
        plugin_version: &Version,
        dep_name: &str,
    ) -> Option<Version> {
        let &from = self.index_of.get(&key(plugin_name, plugin_version))?;
        self.graph
            .edges_directed(from, Direction::Outgoing)
            .find(|edge| edge.weight() == dep_name)
            .map(|edge| self.graph[edge.target()].version.clone())
    }

    /// Every `(name, version)` pair that depends directly on `(name, version)`.
    #[must_use]
    pub fn dependents_of(&self, name: &str, version: &Version) -> Vec<(String, Version)> {
        let Some(&idx) = self.index_of.get(&key(name, version)) else { return Vec::new() };
        self.graph
            .neighbors_directed(idx, Direction::Incoming)
            .map(|idx| {
                let node = &self.graph[idx];
                (node.name.clone(), node.version.clone())
            })
            .collect()
    }

    /// Clears the top-level flag on every version of `name`, then sweeps.
    /// Returns the `(name, version)` pairs that were actually removed from
    /// the graph (whose canonical store copy can now be deleted).
    pub fn untrack_top_level(&mut self, name: &str) -> Vec<(String, Version)> {
        let targets: Vec<NodeIndex> = self
            .index_of
            .iter()
            .filter(|((n, _), _)| n == name)
            .map(|(_, &idx)| idx)
            .collect();
        for idx in targets {
            self.graph[idx].top_level = false;
        }
        self.sweep()
    }

    /// Removes every node whose reference count has reached zero, repeating
    /// until no more nodes qualify (a removal can drop its own dependencies'
    /// counts to zero in turn).
    pub fn sweep(&mut self) -> Vec<(String, Version)> {
        let mut removed = Vec::new();
        loop {
            let dead: Vec<NodeIndex> = self
                .graph
                .node_indices()
                .filter(|&idx| {
                    let node = &self.graph[idx];
                    let in_degree = self.graph.neighbors_directed(idx, Direction::Incoming).count();
                    in_degree + usize::from(node.top_level) == 0
                })
                .collect();
            if dead.is_empty() {
                break;
            }
            for idx in dead {
                let Some(node) = self.graph.remove_node(idx) else { continue };
                self.index_of.remove(&(node.name.clone(), node.version.to_string()));
                removed.push((node.name, node.version));
            }
        }
        removed
    }

    /// Every installed version of `name` currently present in the graph.
    #[must_use]
    pub fn versions_of(&self, name: &str) -> Vec<Version> {
        self.graph.node_weights().filter(|n| n.name == name).map(|n| n.version.clone()).collect()
    }
}
