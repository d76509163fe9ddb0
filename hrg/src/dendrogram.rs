//! Arena-backed binary dendrogram over the nodes of a graph.
//!
//! Leaves are graph nodes `0..n` (canonical order). Internal nodes live in
//! a flat vector indexed `0..n-1`; children and parents are stored as
//! indices, so rearranging the tree is index reassignment.
//!
//! Every internal node `r` caches:
//! - `n_left`, `n_right`: leaf counts under its children (`L_r`, `R_r`)
//! - `n_edges`: graph edges with one endpoint under each child (`E_r`)
//! - `loglik`: its contribution `ℓ_r` to the total log-likelihood
//!
//! The total `Ltotal = Σ_r ℓ_r` is cached and maintained incrementally by
//! the Monte Carlo moves in [`crate::mcmc`].

use crate::error::{HrgError, Result};
use crate::graph::Graph;
use crate::model::{node_loglik, tree_loglik};
use crate::splits::{num_words, Split, SplitHistogram};
use rand::Rng;
use serde::{Deserialize, Serialize};

const LOGLIK_TOLERANCE: f64 = 1e-6;

/// Reference to a dendrogram node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRef {
    /// A leaf, by graph node index
    Leaf(usize),
    /// An internal node, by arena index
    Internal(usize),
}

/// Internal node with its cached statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct InternalNode {
    /// Left child
    pub left: NodeRef,
    /// Right child
    pub right: NodeRef,
    /// Parent (absent for the root)
    pub parent: Option<usize>,
    /// Leaves under the left child
    pub n_left: usize,
    /// Leaves under the right child
    pub n_right: usize,
    /// Graph edges between the two child leaf sets
    pub n_edges: usize,
    /// Cached log-likelihood contribution
    pub loglik: f64,
}

impl InternalNode {
    pub(crate) fn new(left: NodeRef, right: NodeRef, n_left: usize, n_right: usize) -> Self {
        InternalNode {
            left,
            right,
            parent: None,
            n_left,
            n_right,
            n_edges: 0,
            loglik: 0.0,
        }
    }

    /// Total leaves under this node
    #[inline]
    pub fn num_leaves(&self) -> usize {
        self.n_left + self.n_right
    }

    #[inline]
    pub(crate) fn refresh_loglik(&mut self) {
        self.loglik = node_loglik(self.n_left, self.n_right, self.n_edges);
    }
}

/// Reusable buffers for subtree traversals during moves.
#[derive(Debug, Clone, Default)]
pub(crate) struct Scratch {
    pub(crate) marks: Vec<u32>,
    pub(crate) stamp: u32,
    pub(crate) stack: Vec<NodeRef>,
    pub(crate) leaves: Vec<usize>,
}

/// Hierarchical random graph model: a binary tree over the graph's nodes.
#[derive(Debug, Clone)]
pub struct Dendrogram<'g> {
    pub(crate) graph: &'g Graph,
    pub(crate) internals: Vec<InternalNode>,
    pub(crate) leaf_parent: Vec<usize>,
    pub(crate) root: usize,
    pub(crate) loglik: f64,
    pub(crate) delta_loglik: f64,
    pub(crate) histogram: SplitHistogram,
    pub(crate) scratch: Scratch,
}

impl<'g> Dendrogram<'g> {
    /// Build a random dendrogram over the nodes of `graph`.
    ///
    /// Leaves are merged pairwise in random order until one root remains,
    /// then all `(L, R, E, ℓ)` statistics and `Ltotal` are computed from
    /// scratch.
    pub fn from_graph<R: Rng + ?Sized>(graph: &'g Graph, rng: &mut R) -> Result<Self> {
        let n = graph.num_nodes();
        if n < 2 {
            return Err(HrgError::Validation(format!(
                "a dendrogram needs at least 2 nodes, the graph has {}",
                n
            )));
        }

        let mut internals: Vec<InternalNode> = Vec::with_capacity(n - 1);
        let mut leaf_parent = vec![usize::MAX; n];
        let mut pool: Vec<(NodeRef, usize)> = (0..n).map(|i| (NodeRef::Leaf(i), 1)).collect();

        while pool.len() > 1 {
            let (a, size_a) = pool.swap_remove(rng.random_range(0..pool.len()));
            let (b, size_b) = pool.swap_remove(rng.random_range(0..pool.len()));
            let k = internals.len();
            internals.push(InternalNode::new(a, b, size_a, size_b));
            for child in [a, b] {
                match child {
                    NodeRef::Leaf(i) => leaf_parent[i] = k,
                    NodeRef::Internal(j) => internals[j].parent = Some(k),
                }
            }
            pool.push((NodeRef::Internal(k), size_a + size_b));
        }

        let mut dendrogram = Dendrogram {
            graph,
            root: internals.len() - 1,
            internals,
            leaf_parent,
            loglik: 0.0,
            delta_loglik: 0.0,
            histogram: SplitHistogram::new(graph.labels().to_vec()),
            scratch: Scratch::default(),
        };
        dendrogram.recompute_statistics();
        Ok(dendrogram)
    }

    /// Assemble a dendrogram from an already validated topology and
    /// compute its statistics from scratch.
    pub(crate) fn from_parts(
        graph: &'g Graph,
        internals: Vec<InternalNode>,
        leaf_parent: Vec<usize>,
        root: usize,
    ) -> Self {
        let mut dendrogram = Dendrogram {
            graph,
            internals,
            leaf_parent,
            root,
            loglik: 0.0,
            delta_loglik: 0.0,
            histogram: SplitHistogram::new(graph.labels().to_vec()),
            scratch: Scratch::default(),
        };
        dendrogram.recompute_statistics();
        dendrogram
    }

    /// Overwrite every cached statistic with a fresh computation.
    pub(crate) fn recompute_statistics(&mut self) {
        let sizes = self.subtree_sizes();
        let edges = self.count_edges_by_lca();
        for (k, node) in self.internals.iter_mut().enumerate() {
            node.n_left = size_of(&sizes, node.left);
            node.n_right = size_of(&sizes, node.right);
            node.n_edges = edges[k];
            node.refresh_loglik();
        }
        self.loglik = self.internals.iter().map(|x| x.loglik).sum();
    }

    /// The graph this model describes
    pub fn graph(&self) -> &'g Graph {
        self.graph
    }

    /// Number of leaves (graph nodes)
    pub fn num_leaves(&self) -> usize {
        self.leaf_parent.len()
    }

    /// Internal nodes, by arena index
    pub fn internals(&self) -> &[InternalNode] {
        &self.internals
    }

    /// Internal node at arena index `k`
    pub fn internal(&self, k: usize) -> &InternalNode {
        &self.internals[k]
    }

    /// Arena index of the root
    pub fn root(&self) -> usize {
        self.root
    }

    /// Parent of any node (`None` only for the root)
    pub fn parent_of(&self, node: NodeRef) -> Option<usize> {
        match node {
            NodeRef::Leaf(i) => Some(self.leaf_parent[i]),
            NodeRef::Internal(k) => self.internals[k].parent,
        }
    }

    #[inline]
    pub(crate) fn set_parent(&mut self, node: NodeRef, parent: usize) {
        match node {
            NodeRef::Leaf(i) => self.leaf_parent[i] = parent,
            NodeRef::Internal(k) => self.internals[k].parent = Some(parent),
        }
    }

    /// Number of leaves under `node`
    #[inline]
    pub fn leaf_count(&self, node: NodeRef) -> usize {
        match node {
            NodeRef::Leaf(_) => 1,
            NodeRef::Internal(k) => self.internals[k].num_leaves(),
        }
    }

    /// Cached total log-likelihood `Ltotal`
    pub fn loglik(&self) -> f64 {
        self.loglik
    }

    /// Signed change of the most recent move (accepted or not)
    pub fn delta_loglik(&self) -> f64 {
        self.delta_loglik
    }

    /// Number of completed split-sampling calls
    pub fn num_samples(&self) -> u64 {
        self.histogram.num_samples()
    }

    /// Accumulated split histogram
    pub fn split_histogram(&self) -> &SplitHistogram {
        &self.histogram
    }

    /// Graph node labels in canonical order
    pub fn labels(&self) -> &[String] {
        self.graph.labels()
    }

    /// Graph nodes under `node`, ascending.
    pub fn leaves_under(&self, node: NodeRef) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.leaf_count(node));
        let mut stack = vec![node];
        while let Some(x) = stack.pop() {
            match x {
                NodeRef::Leaf(i) => out.push(i),
                NodeRef::Internal(k) => {
                    stack.push(self.internals[k].right);
                    stack.push(self.internals[k].left);
                }
            }
        }
        out.sort_unstable();
        out
    }

    /// Internal nodes in post-order (children before parents).
    pub fn postorder(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.internals.len());
        let mut stack = vec![(self.root, false)];
        while let Some((k, expanded)) = stack.pop() {
            if expanded {
                order.push(k);
                continue;
            }
            stack.push((k, true));
            let node = &self.internals[k];
            for child in [node.right, node.left] {
                if let NodeRef::Internal(c) = child {
                    stack.push((c, false));
                }
            }
        }
        order
    }

    /// Leaf count of every internal subtree, from the topology alone.
    fn subtree_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0usize; self.internals.len()];
        for k in self.postorder() {
            let node = &self.internals[k];
            sizes[k] = size_of(&sizes, node.left) + size_of(&sizes, node.right);
        }
        sizes
    }

    /// Number of graph edges whose lowest common ancestor is each
    /// internal node, from the topology alone.
    fn count_edges_by_lca(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.internals.len()];
        let mut marks = vec![usize::MAX; self.internals.len()];
        for (stamp, (i, j)) in self.graph.edges().enumerate() {
            let mut a = Some(self.leaf_parent[i]);
            while let Some(k) = a {
                marks[k] = stamp;
                a = self.internals[k].parent;
            }
            let mut b = Some(self.leaf_parent[j]);
            while let Some(k) = b {
                if marks[k] == stamp {
                    counts[k] += 1;
                    break;
                }
                b = self.internals[k].parent;
            }
        }
        counts
    }

    /// Total log-likelihood summed from freshly computed node statistics.
    pub fn recompute_loglik(&self) -> f64 {
        let sizes = self.subtree_sizes();
        let edges = self.count_edges_by_lca();
        tree_loglik(self.internals.iter().enumerate().map(|(k, node)| {
            (
                size_of(&sizes, node.left),
                size_of(&sizes, node.right),
                edges[k],
            )
        }))
    }

    /// Audit the full structure and every cached statistic.
    ///
    /// Checks parent/child agreement, a single root, reachability of
    /// every leaf exactly once (no cycles), `L, R ≥ 1`, `E ≤ L·R`, the
    /// cached per-node statistics against a fresh computation, and the
    /// cached `Ltotal` against their sum.
    pub fn check_invariants(&self) -> Result<()> {
        let n = self.num_leaves();
        let violation = |msg: String| Err(HrgError::InvariantViolation(msg));

        if self.internals.len() + 1 != n {
            return violation(format!(
                "{} internal nodes for {} leaves",
                self.internals.len(),
                n
            ));
        }
        if self.internals[self.root].parent.is_some() {
            return violation(format!("root {} has a parent", self.root));
        }

        for (k, node) in self.internals.iter().enumerate() {
            if k != self.root && node.parent.is_none() {
                return violation(format!("internal node {} has no parent", k));
            }
            for child in [node.left, node.right] {
                if self.parent_of(child) != Some(k) {
                    return violation(format!(
                        "{:?} is a child of {} but points to {:?}",
                        child,
                        k,
                        self.parent_of(child)
                    ));
                }
            }
        }

        let mut seen_leaf = vec![false; n];
        let mut seen_internal = vec![false; self.internals.len()];
        let mut stack = vec![NodeRef::Internal(self.root)];
        while let Some(x) = stack.pop() {
            match x {
                NodeRef::Leaf(i) => {
                    if std::mem::replace(&mut seen_leaf[i], true) {
                        return violation(format!("leaf {} reached twice", i));
                    }
                }
                NodeRef::Internal(k) => {
                    if std::mem::replace(&mut seen_internal[k], true) {
                        return violation(format!("internal node {} reached twice", k));
                    }
                    stack.push(self.internals[k].left);
                    stack.push(self.internals[k].right);
                }
            }
        }
        if let Some(i) = seen_leaf.iter().position(|&s| !s) {
            return violation(format!("leaf {} is not under the root", i));
        }
        if let Some(k) = seen_internal.iter().position(|&s| !s) {
            return violation(format!("internal node {} is not under the root", k));
        }

        let sizes = self.subtree_sizes();
        let edges = self.count_edges_by_lca();
        let mut total = 0.0;
        for (k, node) in self.internals.iter().enumerate() {
            let (l, r) = (size_of(&sizes, node.left), size_of(&sizes, node.right));
            if node.n_left != l || node.n_right != r || l == 0 || r == 0 {
                return violation(format!(
                    "node {} caches (L, R) = ({}, {}), topology gives ({}, {})",
                    k, node.n_left, node.n_right, l, r
                ));
            }
            if node.n_edges != edges[k] || node.n_edges > l * r {
                return violation(format!(
                    "node {} caches E = {}, graph gives {} (L·R = {})",
                    k,
                    node.n_edges,
                    edges[k],
                    l * r
                ));
            }
            let fresh = node_loglik(l, r, edges[k]);
            if (node.loglik - fresh).abs() > LOGLIK_TOLERANCE {
                return violation(format!(
                    "node {} caches ℓ = {}, fresh value {}",
                    k, node.loglik, fresh
                ));
            }
            total += fresh;
        }

        if (self.loglik - total).abs() > LOGLIK_TOLERANCE * total.abs().max(1.0) {
            return violation(format!(
                "cached Ltotal = {}, recomputed {}",
                self.loglik, total
            ));
        }
        Ok(())
    }

    /// Distinct canonical splits induced by the non-root internal nodes.
    pub fn current_splits(&self) -> Vec<Split> {
        let n = self.num_leaves();
        let width = num_words(n);
        let mut words: Vec<Option<Vec<u64>>> = vec![None; self.internals.len()];
        let mut splits = Vec::with_capacity(self.internals.len());

        for k in self.postorder() {
            let node = &self.internals[k];
            let mut bits = vec![0u64; width];
            for child in [node.left, node.right] {
                match child {
                    NodeRef::Leaf(i) => bits[i / 64] |= 1 << (i % 64),
                    NodeRef::Internal(c) => {
                        if let Some(sub) = words[c].take() {
                            for (w, s) in bits.iter_mut().zip(sub) {
                                *w |= s;
                            }
                        }
                    }
                }
            }
            if k != self.root {
                if let Some(split) = Split::from_words(n, bits.clone()) {
                    splits.push(split);
                }
            }
            words[k] = Some(bits);
        }

        splits.sort();
        splits.dedup();
        splits
    }

    /// Record the splits of the current tree into the histogram.
    ///
    /// Each distinct split gets `+1` and `num_samples` gets `+1`. The
    /// topology and likelihood are not touched, so this may be called at
    /// any point between moves.
    pub fn sample_splits(&mut self) -> Result<()> {
        let splits = self.current_splits();
        self.histogram.record(splits)
    }

    /// Newick rendering with graph labels at the leaves.
    pub fn to_newick(&self) -> String {
        crate::io::write_newick(
            self.root,
            |k| {
                let node = &self.internals[k];
                vec![node.left, node.right]
            },
            |i| self.graph.label(i).to_string(),
            |_| None,
        )
    }
}

#[inline]
fn size_of(sizes: &[usize], node: NodeRef) -> usize {
    match node {
        NodeRef::Leaf(_) => 1,
        NodeRef::Internal(k) => sizes[k],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn path_graph(n: usize) -> Graph {
        let edges: Vec<(String, String)> = (1..n)
            .map(|i| ((i - 1).to_string(), i.to_string()))
            .collect();
        Graph::from_edges(edges)
    }

    /// ((0,1),(2,3)) over the 4-node path
    fn balanced_path_tree(graph: &Graph) -> Dendrogram<'_> {
        let mut internals = vec![
            InternalNode::new(NodeRef::Leaf(0), NodeRef::Leaf(1), 1, 1),
            InternalNode::new(NodeRef::Leaf(2), NodeRef::Leaf(3), 1, 1),
            InternalNode::new(NodeRef::Internal(0), NodeRef::Internal(1), 2, 2),
        ];
        internals[0].parent = Some(2);
        internals[1].parent = Some(2);
        Dendrogram::from_parts(graph, internals, vec![0, 0, 1, 1], 2)
    }

    #[test]
    fn test_too_few_nodes() {
        let graph = Graph::new(["0"], Vec::<(&str, &str)>::new());
        let mut rng = SmallRng::seed_from_u64(1);
        assert!(matches!(
            Dendrogram::from_graph(&graph, &mut rng),
            Err(HrgError::Validation(_))
        ));
    }

    #[test]
    fn test_from_graph_is_valid() {
        let graph = path_graph(12);
        let mut rng = SmallRng::seed_from_u64(7);
        let d = Dendrogram::from_graph(&graph, &mut rng).unwrap();
        assert_eq!(d.num_leaves(), 12);
        assert_eq!(d.internals().len(), 11);
        assert_eq!(d.internal(d.root()).num_leaves(), 12);
        d.check_invariants().unwrap();
        assert_abs_diff_eq!(d.loglik(), d.recompute_loglik(), epsilon = 1e-9);
        assert_eq!(d.leaves_under(NodeRef::Internal(d.root())), (0..12).collect::<Vec<_>>());
    }

    #[test]
    fn test_balanced_path_statistics() {
        let graph = path_graph(4);
        let d = balanced_path_tree(&graph);
        d.check_invariants().unwrap();

        let root = d.internal(2);
        assert_eq!((root.n_left, root.n_right, root.n_edges), (2, 2, 1));
        assert_eq!(d.internal(0).n_edges, 1);
        assert_eq!(d.internal(0).loglik, 0.0);

        let expected = 0.25_f64.ln() + 3.0 * 0.75_f64.ln();
        assert_abs_diff_eq!(d.loglik(), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_check_invariants_detects_corruption() {
        let graph = path_graph(4);
        let mut d = balanced_path_tree(&graph);
        d.internals[0].n_edges = 0;
        assert!(matches!(
            d.check_invariants(),
            Err(HrgError::InvariantViolation(_))
        ));

        let mut d = balanced_path_tree(&graph);
        d.loglik += 1.0;
        assert!(d.check_invariants().is_err());

        let mut d = balanced_path_tree(&graph);
        d.leaf_parent[3] = 0;
        assert!(d.check_invariants().is_err());
    }

    #[test]
    fn test_current_splits_deduplicates_root_children() {
        let graph = path_graph(4);
        let d = balanced_path_tree(&graph);
        let splits = d.current_splits();
        assert_eq!(splits.len(), 1);
        assert_eq!(splits[0].to_string(), "0011");
    }

    #[test]
    fn test_sample_splits_twice() {
        let graph = path_graph(9);
        let mut rng = SmallRng::seed_from_u64(3);
        let mut d = Dendrogram::from_graph(&graph, &mut rng).unwrap();
        let loglik = d.loglik();

        d.sample_splits().unwrap();
        let first = d.split_histogram().clone();
        d.sample_splits().unwrap();
        let second = d.split_histogram();

        assert_eq!(first.num_samples(), 1);
        assert_eq!(second.num_samples(), 2);
        assert_eq!(first.len(), second.len());
        for (split, &count) in first.counts() {
            assert_eq!(count, 1);
            assert_eq!(second.count(split), 2);
        }
        assert_eq!(d.loglik(), loglik);
    }

    #[test]
    fn test_two_leaves_have_no_splits() {
        let graph = path_graph(2);
        let mut rng = SmallRng::seed_from_u64(3);
        let mut d = Dendrogram::from_graph(&graph, &mut rng).unwrap();
        d.sample_splits().unwrap();
        assert_eq!(d.num_samples(), 1);
        assert!(d.split_histogram().is_empty());
        assert_eq!(d.loglik(), 0.0);
    }

    #[test]
    fn test_newick() {
        let graph = path_graph(4);
        let d = balanced_path_tree(&graph);
        assert_eq!(d.to_newick(), "((0,1),(2,3));");
    }
}
