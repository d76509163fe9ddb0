//! Majority-rule consensus of sampled splits.
//!
//! The consensus is a group tree over the node set. It starts as a star
//! (every node a direct child of the root) and each majority split, in
//! order of decreasing count, is either placed as a new group, found to
//! be represented already, or discarded as incompatible with the groups
//! placed before it.

use crate::dendrogram::NodeRef;
use crate::error::{HrgError, Result};
use crate::graph::canonical_labels;
use crate::io::write_newick;
use crate::splits::{Split, SplitHistogram};
use log::{debug, info};
use serde::Serialize;

/// Builds majority-rule consensus trees from split histograms.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsensusBuilder;

/// A split that made it into the consensus tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SupportedSplit {
    /// Canonical key of the split
    pub split: Split,
    /// Samples containing the split, summed over all histograms
    pub count: u64,
    /// `count` over the merged number of samples
    pub support: f64,
}

/// Group of the consensus tree. Group 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsensusNode {
    /// Enclosing group (none for the root)
    pub parent: Option<usize>,
    /// Children ordered by their smallest node
    pub children: Vec<NodeRef>,
    /// Nodes under this group, ascending
    pub members: Vec<usize>,
    /// Frequency of the split that created the group (none for the root)
    pub support: Option<f64>,
}

/// Multifurcating consensus tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsensusTree {
    labels: Vec<String>,
    num_samples: u64,
    groups: Vec<ConsensusNode>,
    splits: Vec<SupportedSplit>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    In,
    Out,
    Mixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    Added,
    Redundant,
    Incompatible,
}

impl ConsensusBuilder {
    /// A builder with the strict-majority rule
    pub fn new() -> Self {
        ConsensusBuilder
    }

    /// Majority-rule consensus of one or more histograms over `nodes`.
    ///
    /// All histograms must share the node universe and the number of
    /// samples. A split is kept if it occurs in strictly more than half
    /// of all merged samples; kept splits are placed in decreasing count,
    /// ties broken by ascending split key. The result is independent of
    /// the order of `nodes` and of `histograms`.
    pub fn build<S: AsRef<str>>(
        &self,
        nodes: &[S],
        histograms: &[SplitHistogram],
    ) -> Result<ConsensusTree> {
        if histograms.is_empty() {
            return Err(HrgError::Consistency(
                "consensus needs at least one histogram".to_string(),
            ));
        }

        let labels = canonical_labels(nodes.iter().map(|s| s.as_ref()));
        if labels.len() != nodes.len() {
            return Err(HrgError::Consistency(
                "node list contains duplicates".to_string(),
            ));
        }

        for (k, hist) in histograms.iter().enumerate() {
            if hist.num_samples() == 0 {
                return Err(HrgError::Consistency(format!(
                    "histogram {} holds no samples",
                    k
                )));
            }
            if hist.nodes() != labels.as_slice() {
                return Err(HrgError::Consistency(format!(
                    "histogram {} covers {} nodes that differ from the {} given",
                    k,
                    hist.nodes().len(),
                    labels.len()
                )));
            }
        }

        let merged = SplitHistogram::merge(histograms)?;
        let total = merged.num_samples();

        let mut majority: Vec<SupportedSplit> = merged
            .counts()
            .iter()
            .filter(|(_, &count)| 2 * (count as u128) > total as u128)
            .map(|(split, &count)| SupportedSplit {
                split: split.clone(),
                count,
                support: count as f64 / total as f64,
            })
            .collect();
        majority.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.split.cmp(&b.split)));

        let num_majority = majority.len();
        let mut num_discarded = 0;
        let mut tree = ConsensusTree::star(labels, total);

        for candidate in majority {
            match tree.place(&candidate.split, candidate.support) {
                Placement::Added => {
                    debug_assert!(tree
                        .splits
                        .iter()
                        .all(|placed| placed.split.is_compatible(&candidate.split)));
                    tree.splits.push(candidate)
                }
                Placement::Redundant => {}
                Placement::Incompatible => {
                    num_discarded += 1;
                    debug!(
                        "discarding split {} (support {:.3}): incompatible with the tree",
                        candidate.split, candidate.support
                    );
                }
            }
        }
        tree.finalize();

        info!(
            "consensus over {} samples from {} histogram(s): {} of {} splits with majority, {} placed, {} discarded",
            total,
            histograms.len(),
            num_majority,
            merged.len(),
            tree.splits.len(),
            num_discarded
        );

        Ok(tree)
    }
}

impl ConsensusTree {
    fn star(labels: Vec<String>, num_samples: u64) -> Self {
        let n = labels.len();
        ConsensusTree {
            labels,
            num_samples,
            groups: vec![ConsensusNode {
                parent: None,
                children: (0..n).map(NodeRef::Leaf).collect(),
                members: (0..n).collect(),
                support: None,
            }],
            splits: vec![],
        }
    }

    fn side_of(&self, split: &Split, node: NodeRef) -> Side {
        match node {
            NodeRef::Leaf(i) if split.contains(i) => Side::In,
            NodeRef::Leaf(_) => Side::Out,
            NodeRef::Internal(g) => {
                let members = &self.groups[g].members;
                let inside = members.iter().filter(|&&i| split.contains(i)).count();
                if inside == 0 {
                    Side::Out
                } else if inside == members.len() {
                    Side::In
                } else {
                    Side::Mixed
                }
            }
        }
    }

    /// Descend from the root to the group that holds one side of `split`
    /// and gather that side into a new group.
    ///
    /// At the root either side may be the one to descend with. Below the
    /// root the side is fixed: it must lie entirely inside the one child
    /// that straddles the split.
    fn place(&mut self, split: &Split, support: f64) -> Placement {
        let n = self.labels.len();
        let side_size = split.side_size();
        if side_size < 2 || n - side_size < 2 {
            // a single node is a leaf of every tree
            return Placement::Redundant;
        }

        let mut at = 0;
        let mut fixed: Option<Side> = None;
        loop {
            let children = &self.groups[at].children;
            let sides: Vec<Side> = children.iter().map(|&c| self.side_of(split, c)).collect();
            let mixed: Vec<usize> = (0..sides.len())
                .filter(|&j| sides[j] == Side::Mixed)
                .collect();

            match mixed.as_slice() {
                [] => {
                    let targets = match fixed {
                        Some(side) => vec![side],
                        None => vec![Side::In, Side::Out],
                    };
                    let picked: Vec<Vec<NodeRef>> = targets
                        .into_iter()
                        .map(|t| {
                            children
                                .iter()
                                .zip(sides.iter())
                                .filter(|(_, &s)| s == t)
                                .map(|(&c, _)| c)
                                .collect::<Vec<_>>()
                        })
                        .filter(|p| p.len() >= 2 && p.len() < children.len())
                        .collect();
                    if picked.is_empty() {
                        return Placement::Redundant;
                    }
                    for p in picked {
                        self.gather(at, p, support);
                    }
                    return Placement::Added;
                }
                [m] => {
                    let contained = |t: Side| !sides.contains(&t);
                    let side = match fixed {
                        None if contained(Side::In) => Side::In,
                        None if contained(Side::Out) => Side::Out,
                        Some(side) if contained(side) => side,
                        _ => return Placement::Incompatible,
                    };
                    let NodeRef::Internal(g) = children[*m] else {
                        return Placement::Incompatible;
                    };
                    fixed = Some(side);
                    at = g;
                }
                _ => return Placement::Incompatible,
            }
        }
    }

    fn gather(&mut self, at: usize, picked: Vec<NodeRef>, support: f64) {
        let g = self.groups.len();
        let mut members: Vec<usize> = vec![];
        for &child in &picked {
            match child {
                NodeRef::Leaf(i) => members.push(i),
                NodeRef::Internal(k) => {
                    members.extend_from_slice(&self.groups[k].members);
                    self.groups[k].parent = Some(g);
                }
            }
        }
        members.sort_unstable();

        let parent = &mut self.groups[at];
        parent.children.retain(|c| !picked.contains(c));
        parent.children.push(NodeRef::Internal(g));

        self.groups.push(ConsensusNode {
            parent: Some(at),
            children: picked,
            members,
            support: Some(support),
        });
    }

    fn finalize(&mut self) {
        let first: Vec<usize> = self
            .groups
            .iter()
            .map(|x| x.members.first().copied().unwrap_or(usize::MAX))
            .collect();
        for group in self.groups.iter_mut() {
            group.children.sort_by_key(|&c| match c {
                NodeRef::Leaf(i) => i,
                NodeRef::Internal(k) => first[k],
            });
        }
    }

    /// Node labels in canonical order; leaves index into this list
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Total number of samples behind the support values
    pub fn num_samples(&self) -> u64 {
        self.num_samples
    }

    /// Groups; index 0 is the root
    pub fn groups(&self) -> &[ConsensusNode] {
        &self.groups
    }

    /// The root group
    pub fn root(&self) -> &ConsensusNode {
        &self.groups[0]
    }

    /// Splits placed in the tree, in placement order
    pub fn splits(&self) -> &[SupportedSplit] {
        &self.splits
    }

    /// Labels under each of the root's children.
    pub fn root_partition(&self) -> Vec<Vec<String>> {
        self.root()
            .children
            .iter()
            .map(|&c| match c {
                NodeRef::Leaf(i) => vec![self.labels[i].clone()],
                NodeRef::Internal(g) => self.groups[g]
                    .members
                    .iter()
                    .map(|&i| self.labels[i].clone())
                    .collect(),
            })
            .collect()
    }

    /// Newick topology without support values
    pub fn to_newick(&self) -> String {
        self.newick(|_| None)
    }

    /// Newick with each group's support as its internal label.
    pub fn to_newick_with_support(&self) -> String {
        self.newick(|g| self.groups[g].support.map(|s| format!("{:.3}", s)))
    }

    fn newick<F: Fn(usize) -> Option<String>>(&self, internal_label: F) -> String {
        write_newick(
            0,
            |g| self.groups[g].children.clone(),
            |i| self.labels[i].clone(),
            internal_label,
        )
    }

    /// Pretty JSON of labels, groups and placed splits
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn labels(n: usize) -> Vec<String> {
        (0..n).map(|i| i.to_string()).collect()
    }

    fn histogram(n: usize, num_samples: u64, counts: &[(&str, u64)]) -> SplitHistogram {
        let counts: Vec<String> = counts
            .iter()
            .map(|(k, c)| format!("\"{}\":{}", k, c))
            .collect();
        let nodes: Vec<String> = labels(n).iter().map(|s| format!("\"{}\"", s)).collect();
        let blob = format!(
            r#"{{"nodes":[{}],"num_samples":{},"counts":{{{}}}}}"#,
            nodes.join(","),
            num_samples,
            counts.join(",")
        );
        SplitHistogram::from_json(&blob).unwrap()
    }

    #[test]
    fn test_path_majority() {
        let hist = histogram(4, 100, &[("0011", 80), ("0101", 15), ("0001", 100)]);
        let tree = ConsensusBuilder::new().build(&labels(4), &[hist]).unwrap();
        assert_eq!(tree.to_newick(), "((0,1),(2,3));");
        assert_eq!(tree.to_newick_with_support(), "((0,1)0.800,(2,3)0.800);");
        assert_eq!(tree.splits().len(), 1);
        assert_eq!(tree.root().children.len(), 2);
    }

    #[test]
    fn test_single_histogram_support_exceeds_half() {
        let hist = histogram(
            6,
            10,
            &[("000111", 9), ("000011", 6), ("001100", 5), ("011000", 4)],
        );
        let tree = ConsensusBuilder::new().build(&labels(6), &[hist]).unwrap();
        assert!(!tree.splits().is_empty());
        for s in tree.splits() {
            assert!(s.support > 0.5);
        }
        for group in tree.groups().iter().skip(1) {
            assert!(group.support.unwrap() > 0.5);
        }
    }

    #[test]
    fn test_exact_half_is_excluded() {
        let a = histogram(4, 1000, &[("0011", 500)]);
        let b = histogram(4, 1000, &[("0011", 500)]);
        let tree = ConsensusBuilder::new().build(&labels(4), &[a, b]).unwrap();
        assert_eq!(tree.num_samples(), 2000);
        assert!(tree.splits().is_empty());
        assert_eq!(tree.to_newick(), "(0,1,2,3);");

        let a = histogram(4, 1000, &[("0011", 501)]);
        let b = histogram(4, 1000, &[("0011", 500)]);
        let tree = ConsensusBuilder::new().build(&labels(4), &[a, b]).unwrap();
        assert_eq!(tree.splits().len(), 1);
        assert_abs_diff_eq!(tree.splits()[0].support, 0.5005, epsilon = 1e-12);
    }

    #[test]
    fn test_order_independence() {
        let a = histogram(5, 10, &[("00111", 8), ("00011", 7), ("01100", 2)]);
        let b = histogram(5, 10, &[("00111", 9), ("00011", 4), ("01010", 3)]);
        let builder = ConsensusBuilder::new();

        let nodes = labels(5);
        let shuffled = vec!["3", "0", "4", "2", "1"];
        let x = builder.build(&nodes, &[a.clone(), b.clone()]).unwrap();
        let y = builder.build(&shuffled, &[b, a]).unwrap();

        assert_eq!(x.to_newick_with_support(), y.to_newick_with_support());
        assert_eq!(x.to_json().unwrap(), y.to_json().unwrap());
    }

    #[test]
    fn test_consistency_errors() {
        let builder = ConsensusBuilder::new();
        let hist = histogram(4, 10, &[("0011", 8)]);

        let none: Vec<SplitHistogram> = vec![];
        assert!(matches!(
            builder.build(&labels(4), &none),
            Err(HrgError::Consistency(_))
        ));

        let empty = SplitHistogram::new(labels(4));
        assert!(matches!(
            builder.build(&labels(4), &[empty]),
            Err(HrgError::Consistency(_))
        ));

        let other = histogram(4, 11, &[("0011", 8)]);
        assert!(matches!(
            builder.build(&labels(4), &[hist.clone(), other]),
            Err(HrgError::Consistency(_))
        ));

        assert!(matches!(
            builder.build(&labels(5), &[hist.clone()]),
            Err(HrgError::Consistency(_))
        ));
        assert!(matches!(
            builder.build(&["0", "1", "2", "2"], &[hist]),
            Err(HrgError::Consistency(_))
        ));

        // bypass validation to get a key of the wrong length
        let bad: SplitHistogram =
            serde_json::from_str(r#"{"nodes":["0","1","2","3"],"num_samples":4,"counts":{"00011":3}}"#)
                .unwrap();
        assert!(matches!(
            builder.build(&labels(4), &[bad]),
            Err(HrgError::Consistency(_))
        ));
    }

    #[test]
    fn test_polytomy() {
        let hist = histogram(6, 20, &[("000111", 15)]);
        let tree = ConsensusBuilder::new().build(&labels(6), &[hist]).unwrap();
        assert_eq!(tree.to_newick(), "((0,1,2),(3,4,5));");
        assert_eq!(
            tree.root_partition(),
            vec![
                vec!["0".to_string(), "1".to_string(), "2".to_string()],
                vec!["3".to_string(), "4".to_string(), "5".to_string()],
            ]
        );
    }

    #[test]
    fn test_caterpillar() {
        let hist = histogram(5, 100, &[("00111", 90), ("00011", 80)]);
        let tree = ConsensusBuilder::new().build(&labels(5), &[hist]).unwrap();
        assert_eq!(tree.to_newick(), "((0,1),(2,(3,4)));");
        assert_eq!(tree.splits().len(), 2);

        let group = tree
            .groups()
            .iter()
            .find(|g| g.members == vec![3, 4])
            .unwrap();
        assert_abs_diff_eq!(group.support.unwrap(), 0.8, epsilon = 1e-12);
    }

    #[test]
    fn test_nested_split_below_root() {
        // {3,4,5} splits the root, {0,1} nests inside the other side and
        // {5,6} crosses both root groups
        let hist = histogram(7, 100, &[("0001110", 90), ("1100000", 70), ("0000011", 60)]);
        let tree = ConsensusBuilder::new().build(&labels(7), &[hist]).unwrap();
        assert_eq!(tree.to_newick(), "(((0,1),2,6),(3,4,5));");
    }

    #[test]
    fn test_incompatible_split_discarded() {
        let hist = histogram(4, 100, &[("0011", 60), ("0101", 55)]);
        let tree = ConsensusBuilder::new().build(&labels(4), &[hist]).unwrap();
        assert_eq!(tree.to_newick(), "((0,1),(2,3));");
        assert_eq!(tree.splits().len(), 1);
        assert_eq!(tree.splits()[0].split.to_string(), "0011");
    }

    #[test]
    fn test_text_labels() {
        let nodes = vec!["d", "b", "a", "c"];
        let hist_nodes = canonical_labels(&nodes);
        let mut hist = SplitHistogram::new(hist_nodes);
        for _ in 0..3 {
            hist.record([Split::from_members(4, [0, 1]).unwrap()]).unwrap();
        }
        let tree = ConsensusBuilder::new().build(&nodes, &[hist]).unwrap();
        assert_eq!(tree.to_newick(), "((a,b),(c,d));");
    }
}
