//! Graph module for deadlock detection
//!
//! The wait-for graph records which clients are waiting for which other
//! clients in one global snapshot.

pub mod wait_for_graph;

pub use wait_for_graph::WaitForGraph;
