//! The plugin -> dependency-version graph and its reference counts.

mod dependency_graph;

pub use dependency_graph::DependencyGraph;
