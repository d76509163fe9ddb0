//! Immutable undirected graph consumed by the dendrogram.
//!
//! Nodes are identified by string labels. Internally node `i` is the
//! `i`-th label in canonical order: labels that parse as integers come
//! first in numeric order, the rest follow lexicographically. Every
//! index-based structure in the crate (split keys, leaf bindings) refers
//! to this order.

use log::debug;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Undirected simple graph with sorted adjacency lists.
#[derive(Debug, Clone)]
pub struct Graph {
    labels: Vec<String>,
    index: HashMap<String, usize>,
    adj_list: Vec<Vec<usize>>,
    num_edges: usize,
}

/// Canonical ordering of node labels.
pub(crate) fn compare_labels(a: &str, b: &str) -> Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Sort and deduplicate labels into canonical order.
pub fn canonical_labels<I, S>(labels: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = labels.into_iter().map(|s| s.as_ref().to_string()).collect();
    out.sort_by(|a, b| compare_labels(a, b));
    out.dedup();
    out
}

impl Graph {
    /// Build a graph from an edge list. The node set is the set of
    /// endpoints.
    pub fn from_edges<I, S>(edges: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: AsRef<str>,
    {
        Self::new(std::iter::empty::<&str>(), edges)
    }

    /// Build a graph from explicit nodes (possibly isolated) plus edges.
    ///
    /// Self-loops and repeated edges are dropped.
    pub fn new<N, T, I, S>(nodes: N, edges: I) -> Self
    where
        N: IntoIterator<Item = T>,
        T: AsRef<str>,
        I: IntoIterator<Item = (S, S)>,
        S: AsRef<str>,
    {
        let pairs: Vec<(String, String)> = edges
            .into_iter()
            .map(|(a, b)| (a.as_ref().to_string(), b.as_ref().to_string()))
            .collect();

        let labels = canonical_labels(
            nodes
                .into_iter()
                .map(|s| s.as_ref().to_string())
                .chain(pairs.iter().flat_map(|(a, b)| [a.clone(), b.clone()])),
        );

        let index: HashMap<String, usize> = labels
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), i))
            .collect();

        let mut adj_list = vec![Vec::new(); labels.len()];
        let mut self_loops = 0;
        for (a, b) in &pairs {
            let (i, j) = (index[a], index[b]);
            if i == j {
                self_loops += 1;
                continue;
            }
            adj_list[i].push(j);
            adj_list[j].push(i);
        }

        let mut num_edges = 0;
        for nbrs in adj_list.iter_mut() {
            nbrs.sort_unstable();
            nbrs.dedup();
            num_edges += nbrs.len();
        }
        num_edges /= 2;

        let repeated = pairs.len() - self_loops - num_edges;
        if self_loops > 0 || repeated > 0 {
            debug!(
                "dropped {} self-loops and {} repeated edges",
                self_loops, repeated
            );
        }

        Graph {
            labels,
            index,
            adj_list,
            num_edges,
        }
    }

    /// Number of nodes
    pub fn num_nodes(&self) -> usize {
        self.labels.len()
    }

    /// Number of undirected edges
    pub fn num_edges(&self) -> usize {
        self.num_edges
    }

    /// Node labels in canonical order
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Label of node `i`
    pub fn label(&self, i: usize) -> &str {
        &self.labels[i]
    }

    /// Index of a label, if present
    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.index.get(label).copied()
    }

    /// Sorted neighbours of node `i`
    #[inline]
    pub fn neighbors(&self, i: usize) -> &[usize] {
        &self.adj_list[i]
    }

    /// Iterate each undirected edge once as `(i, j)` with `i < j`
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.adj_list
            .iter()
            .enumerate()
            .flat_map(|(i, nbrs)| nbrs.iter().filter(move |&&j| j > i).map(move |&j| (i, j)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_label_order() {
        let labels = canonical_labels(["10", "b", "2", "a", "-1", "2"]);
        assert_eq!(labels, vec!["-1", "2", "10", "a", "b"]);
    }

    #[test]
    fn test_from_edges_drops_loops_and_duplicates() {
        let g = Graph::from_edges([("0", "1"), ("1", "0"), ("1", "1"), ("1", "2")]);
        assert_eq!(g.num_nodes(), 3);
        assert_eq!(g.num_edges(), 2);
        assert_eq!(g.neighbors(0), &[1]);
        assert_eq!(g.neighbors(1), &[0, 2]);
        assert_eq!(g.neighbors(2), &[1]);
        assert_eq!(g.edges().collect::<Vec<_>>(), vec![(0, 1), (1, 2)]);
    }

    #[test]
    fn test_isolated_nodes() {
        let g = Graph::new(["7", "3"], [("3", "5")]);
        assert_eq!(g.labels(), &["3", "5", "7"]);
        assert_eq!(g.index_of("7"), Some(2));
        assert!(g.neighbors(2).is_empty());
        assert_eq!(g.num_edges(), 1);
    }
}
