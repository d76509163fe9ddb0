//! Persistence of dendrograms and Newick rendering.
//!
//! A dendrogram is saved as its topology with the per-node `(L, R, E)`
//! annotations and the total log-likelihood. Loading validates the record
//! against a graph and recomputes every statistic from scratch.

use crate::dendrogram::{Dendrogram, InternalNode, NodeRef};
use crate::error::{HrgError, Result};
use crate::graph::{canonical_labels, Graph};
use log::warn;
use serde::{Deserialize, Serialize};

/// Child reference in a persisted dendrogram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChildRecord {
    /// A leaf, by graph label
    Leaf(String),
    /// An internal node, by index into `internals`
    Internal(usize),
}

/// Persisted internal node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternalRecord {
    /// Left child
    pub left: ChildRecord,
    /// Right child
    pub right: ChildRecord,
    /// Leaves under the left child (`L`)
    pub n_left: usize,
    /// Leaves under the right child (`R`)
    pub n_right: usize,
    /// Graph edges between the two sides (`E`)
    pub n_edges: usize,
}

/// Persisted dendrogram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DendrogramRecord {
    /// Graph labels in canonical order
    pub nodes: Vec<String>,
    /// Index of the root in `internals`
    pub root: usize,
    /// Internal nodes
    pub internals: Vec<InternalRecord>,
    /// `Ltotal` at the time of saving
    pub loglik: f64,
}

impl<'g> Dendrogram<'g> {
    /// Snapshot of the topology and cached statistics.
    pub fn to_record(&self) -> DendrogramRecord {
        let child = |x: NodeRef| match x {
            NodeRef::Leaf(i) => ChildRecord::Leaf(self.graph.label(i).to_string()),
            NodeRef::Internal(k) => ChildRecord::Internal(k),
        };
        DendrogramRecord {
            nodes: self.labels().to_vec(),
            root: self.root,
            internals: self
                .internals
                .iter()
                .map(|x| InternalRecord {
                    left: child(x.left),
                    right: child(x.right),
                    n_left: x.n_left,
                    n_right: x.n_right,
                    n_edges: x.n_edges,
                })
                .collect(),
            loglik: self.loglik,
        }
    }

    /// Serialize the topology to JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_record())?)
    }

    /// Rebuild a dendrogram from a JSON blob, validated against `graph`.
    pub fn from_json(blob: &str, graph: &'g Graph) -> Result<Self> {
        let record: DendrogramRecord = serde_json::from_str(blob)?;
        Self::from_record(&record, graph)
    }

    /// Rebuild a dendrogram from a record, validated against `graph`.
    ///
    /// * `Validation` - the record's leaves differ from the graph's nodes,
    ///   or its edge annotations disagree with the graph
    /// * `Format` - the record is not a valid binary tree over its leaves
    ///
    /// Nothing is returned on failure. A stored likelihood that disagrees
    /// with the recomputed one is replaced.
    pub fn from_record(record: &DendrogramRecord, graph: &'g Graph) -> Result<Self> {
        let n = graph.num_nodes();

        let record_labels = canonical_labels(&record.nodes);
        if record_labels.len() != record.nodes.len() {
            return Err(HrgError::Format(
                "dendrogram lists a leaf more than once".to_string(),
            ));
        }
        if record_labels.as_slice() != graph.labels() {
            return Err(HrgError::Validation(format!(
                "dendrogram has {} leaves that do not match the graph's {} nodes",
                record_labels.len(),
                n
            )));
        }
        if n < 2 {
            return Err(HrgError::Validation(format!(
                "a dendrogram needs at least 2 nodes, the graph has {}",
                n
            )));
        }

        let m = record.internals.len();
        if m + 1 != n {
            return Err(HrgError::Format(format!(
                "{} internal nodes for {} leaves",
                m, n
            )));
        }
        if record.root >= m {
            return Err(HrgError::Format(format!("root index {} out of range", record.root)));
        }

        let resolve = |c: &ChildRecord| -> Result<NodeRef> {
            match c {
                ChildRecord::Leaf(label) => graph
                    .index_of(label)
                    .map(NodeRef::Leaf)
                    .ok_or_else(|| HrgError::Validation(format!("leaf {:?} not in graph", label))),
                ChildRecord::Internal(k) if *k < m => Ok(NodeRef::Internal(*k)),
                ChildRecord::Internal(k) => Err(HrgError::Format(format!(
                    "internal reference {} out of range",
                    k
                ))),
            }
        };

        let mut internals = Vec::with_capacity(m);
        let mut leaf_parent: Vec<Option<usize>> = vec![None; n];
        let mut internal_parent: Vec<Option<usize>> = vec![None; m];

        for (k, rec) in record.internals.iter().enumerate() {
            let left = resolve(&rec.left)?;
            let right = resolve(&rec.right)?;
            for child in [left, right] {
                let slot = match child {
                    NodeRef::Leaf(i) => &mut leaf_parent[i],
                    NodeRef::Internal(c) if c == k => {
                        return Err(HrgError::Format(format!("node {} is its own child", k)))
                    }
                    NodeRef::Internal(c) => &mut internal_parent[c],
                };
                if slot.replace(k).is_some() {
                    return Err(HrgError::Format(format!(
                        "{:?} has more than one parent",
                        child
                    )));
                }
            }
            internals.push(InternalNode::new(left, right, rec.n_left, rec.n_right));
        }

        if let Some(i) = leaf_parent.iter().position(Option::is_none) {
            return Err(HrgError::Format(format!(
                "leaf {:?} is not attached to the tree",
                graph.label(i)
            )));
        }
        for (k, parent) in internal_parent.iter().enumerate() {
            match (k == record.root, parent) {
                (true, Some(p)) => {
                    return Err(HrgError::Format(format!("root {} has parent {}", k, p)))
                }
                (false, None) => {
                    return Err(HrgError::Format(format!(
                        "internal node {} has no parent besides the root",
                        k
                    )))
                }
                _ => {}
            }
            internals[k].parent = *parent;
        }

        // every node has exactly one parent; a cycle would leave part of
        // the arena unreachable from the root
        let mut reached = 0;
        let mut stack = vec![record.root];
        let mut seen = vec![false; m];
        while let Some(k) = stack.pop() {
            if std::mem::replace(&mut seen[k], true) {
                return Err(HrgError::Format(format!("node {} reached twice", k)));
            }
            reached += 1;
            for child in [internals[k].left, internals[k].right] {
                if let NodeRef::Internal(c) = child {
                    stack.push(c);
                }
            }
        }
        if reached != m {
            return Err(HrgError::Format(format!(
                "{} of {} internal nodes are not under the root",
                m - reached,
                m
            )));
        }

        let leaf_parent: Vec<usize> = leaf_parent.into_iter().flatten().collect();
        let dendrogram = Dendrogram::from_parts(graph, internals, leaf_parent, record.root);

        for (k, (rec, node)) in record
            .internals
            .iter()
            .zip(dendrogram.internals.iter())
            .enumerate()
        {
            if (rec.n_left, rec.n_right) != (node.n_left, node.n_right) {
                return Err(HrgError::Format(format!(
                    "node {} stores (L, R) = ({}, {}), topology gives ({}, {})",
                    k, rec.n_left, rec.n_right, node.n_left, node.n_right
                )));
            }
            if rec.n_edges != node.n_edges {
                return Err(HrgError::Validation(format!(
                    "node {} stores E = {}, the graph gives {}",
                    k, rec.n_edges, node.n_edges
                )));
            }
        }

        if (record.loglik - dendrogram.loglik).abs() > 1e-6 * dendrogram.loglik.abs().max(1.0) {
            warn!(
                "stored log-likelihood {} differs from recomputed {}",
                record.loglik, dendrogram.loglik
            );
        }

        Ok(dendrogram)
    }
}

/// Render a tree in Newick format without recursion.
///
/// * `root` - index of the root internal node
/// * `children` - children of an internal node, in output order
/// * `leaf_label` - label of a leaf
/// * `internal_label` - optional label written after an internal node's
///   closing parenthesis
pub(crate) fn write_newick<C, L, I>(
    root: usize,
    children: C,
    leaf_label: L,
    internal_label: I,
) -> String
where
    C: Fn(usize) -> Vec<NodeRef>,
    L: Fn(usize) -> String,
    I: Fn(usize) -> Option<String>,
{
    enum Step {
        Open(usize),
        Close(usize),
        Leaf(usize),
        Comma,
    }

    let mut out = String::new();
    let mut stack = vec![Step::Open(root)];
    while let Some(step) = stack.pop() {
        match step {
            Step::Open(k) => {
                out.push('(');
                stack.push(Step::Close(k));
                let kids = children(k);
                for (pos, child) in kids.iter().enumerate().rev() {
                    stack.push(match *child {
                        NodeRef::Leaf(i) => Step::Leaf(i),
                        NodeRef::Internal(c) => Step::Open(c),
                    });
                    if pos > 0 {
                        stack.push(Step::Comma);
                    }
                }
            }
            Step::Close(k) => {
                out.push(')');
                if let Some(label) = internal_label(k) {
                    out.push_str(&label);
                }
            }
            Step::Leaf(i) => out.push_str(&leaf_label(i)),
            Step::Comma => out.push(','),
        }
    }
    out.push(';');
    out
}
