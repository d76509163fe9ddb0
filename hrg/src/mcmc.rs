//! Metropolis Monte Carlo moves on the dendrogram.
//!
//! A move picks a non-root internal node `r` with parent `p`. With `A, B`
//! the children of `r` and `C` the sibling of `r`, the current arrangement
//! is `p = ((A, B), C)`; the two alternatives are `((A, C), B)` and
//! `((B, C), A)`. Only `r` and `p` change children, so only their
//! `(L, R, E, ℓ)` are recomputed:
//!
//! ```text
//! X = child kept under r, Y = child promoted into C's old slot
//! E'_r = e(X, C)
//! E'_p = E_r + E_p - e(X, C)
//! ```
//!
//! `e(X, C)` is the only quantity read from the graph per move. A
//! rejected move is undone from a snapshot of `r`, `p` and the two parent
//! pointers that changed.

use crate::dendrogram::{Dendrogram, InternalNode, NodeRef};
use crate::error::{HrgError, Result};
use crate::model::node_loglik;
use rand::Rng;

/// A move that has been applied and can still be reverted.
#[derive(Debug, Clone)]
pub struct Proposal {
    node: usize,
    parent: usize,
    promoted: NodeRef,
    sibling: NodeRef,
    old_node: InternalNode,
    old_parent: InternalNode,
    delta_loglik: f64,
}

impl Proposal {
    /// Change of `Ltotal` caused by this move
    pub fn delta_loglik(&self) -> f64 {
        self.delta_loglik
    }
}

/// Metropolis acceptance: always accept `delta ≥ 0`, otherwise accept
/// with probability `exp(delta / temperature)`.
#[inline]
pub fn metropolis_accept<R: Rng + ?Sized>(delta: f64, temperature: f64, rng: &mut R) -> bool {
    if delta >= 0.0 {
        return true;
    }
    rng.random::<f64>() < (delta / temperature).exp()
}

fn check_temperature(temperature: f64) -> Result<()> {
    if temperature.is_finite() && temperature > 0.0 {
        Ok(())
    } else {
        Err(HrgError::Validation(format!(
            "temperature must be finite and positive, got {}",
            temperature
        )))
    }
}

impl<'g> Dendrogram<'g> {
    /// Propose a random rearrangement, then accept or reject it at the
    /// given temperature.
    ///
    /// Returns whether the move was taken. `delta_loglik()` reports the
    /// proposal's change in either case; `loglik()` changes only on
    /// acceptance. A two-leaf dendrogram has nothing to rearrange and
    /// always returns `false`.
    ///
    /// Cost is `O(|X| + |C| + deg(smaller side))` for the one crossing
    /// count `e(X, C)`, where `X` and `C` are the subtrees joined under
    /// the rearranged node; the cached statistics of all other nodes are
    /// untouched. This is small on bushy trees and grows toward `O(n)` on
    /// caterpillar-shaped ones.
    pub fn monte_carlo_move<R: Rng + ?Sized>(
        &mut self,
        temperature: f64,
        rng: &mut R,
    ) -> Result<bool> {
        check_temperature(temperature)?;

        let proposal = match self.propose_move(rng)? {
            Some(p) => p,
            None => return Ok(false),
        };

        let delta = proposal.delta_loglik;
        if metropolis_accept(delta, temperature, rng) {
            self.loglik += delta;
            Ok(true)
        } else {
            self.revert_move(proposal);
            Ok(false)
        }
    }

    /// Apply a uniformly random rearrangement and return what is needed
    /// to undo it. `loglik()` is left untouched; the caller decides.
    pub fn propose_move<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<Option<Proposal>> {
        let m = self.internals.len();
        if m < 2 {
            self.delta_loglik = 0.0;
            return Ok(None);
        }

        // uniform over non-root internal nodes
        let mut node = rng.random_range(0..m - 1);
        if node >= self.root {
            node += 1;
        }
        let promote_left = rng.random_bool(0.5);

        self.rearrange(node, promote_left).map(Some)
    }

    /// Rearrange around `node` and its parent.
    ///
    /// * `promote_left` - if true the left child of `node` is promoted
    ///   and the right child stays; otherwise the reverse.
    pub(crate) fn rearrange(&mut self, node: usize, promote_left: bool) -> Result<Proposal> {
        let parent = self.internals[node].parent.ok_or_else(|| {
            HrgError::InvariantViolation(format!("node {} has no parent to rotate with", node))
        })?;

        let old_node = self.internals[node].clone();
        let old_parent = self.internals[parent].clone();

        let node_is_left = match (old_parent.left, old_parent.right) {
            (NodeRef::Internal(k), _) if k == node => true,
            (_, NodeRef::Internal(k)) if k == node => false,
            _ => {
                return Err(HrgError::InvariantViolation(format!(
                    "node {} is not a child of its parent {}",
                    node, parent
                )))
            }
        };
        let sibling = if node_is_left {
            old_parent.right
        } else {
            old_parent.left
        };
        let (kept, promoted) = if promote_left {
            (old_node.right, old_node.left)
        } else {
            (old_node.left, old_node.right)
        };

        let n_kept = self.leaf_count(kept);
        let n_sibling = self.leaf_count(sibling);
        let n_promoted = self.leaf_count(promoted);
        if n_kept + n_sibling + n_promoted != old_parent.num_leaves() {
            return Err(HrgError::InvariantViolation(format!(
                "leaf count mismatch at node {}: {} + {} + {} != {}",
                parent,
                n_kept,
                n_sibling,
                n_promoted,
                old_parent.num_leaves()
            )));
        }

        let e_kept_sibling = self.crossing_edges(kept, sibling);
        if e_kept_sibling > old_parent.n_edges {
            return Err(HrgError::InvariantViolation(format!(
                "node {} caches E = {} but {} edges cross into its sibling side",
                parent, old_parent.n_edges, e_kept_sibling
            )));
        }
        let e_parent = old_node.n_edges + old_parent.n_edges - e_kept_sibling;
        if e_parent > (n_kept + n_sibling) * n_promoted {
            return Err(HrgError::InvariantViolation(format!(
                "rearranged node {} would hold {} edges over {} pairs",
                parent,
                e_parent,
                (n_kept + n_sibling) * n_promoted
            )));
        }

        let new_loglik_node = node_loglik(n_kept, n_sibling, e_kept_sibling);
        let (n_left_parent, n_right_parent) = if node_is_left {
            (n_kept + n_sibling, n_promoted)
        } else {
            (n_promoted, n_kept + n_sibling)
        };
        let new_loglik_parent = node_loglik(n_left_parent, n_right_parent, e_parent);

        {
            let x = &mut self.internals[node];
            x.left = kept;
            x.right = sibling;
            x.n_left = n_kept;
            x.n_right = n_sibling;
            x.n_edges = e_kept_sibling;
            x.loglik = new_loglik_node;
        }
        {
            let p = &mut self.internals[parent];
            if node_is_left {
                p.right = promoted;
            } else {
                p.left = promoted;
            }
            p.n_left = n_left_parent;
            p.n_right = n_right_parent;
            p.n_edges = e_parent;
            p.loglik = new_loglik_parent;
        }
        self.set_parent(sibling, node);
        self.set_parent(promoted, parent);

        let delta_loglik =
            (new_loglik_node + new_loglik_parent) - (old_node.loglik + old_parent.loglik);
        self.delta_loglik = delta_loglik;

        Ok(Proposal {
            node,
            parent,
            promoted,
            sibling,
            old_node,
            old_parent,
            delta_loglik,
        })
    }

    /// Undo an applied proposal, restoring the touched nodes exactly.
    pub fn revert_move(&mut self, proposal: Proposal) {
        let Proposal {
            node,
            parent,
            promoted,
            sibling,
            old_node,
            old_parent,
            ..
        } = proposal;
        self.internals[node] = old_node;
        self.internals[parent] = old_parent;
        self.set_parent(sibling, parent);
        self.set_parent(promoted, node);
    }

    /// Number of graph edges between the leaves of two disjoint subtrees.
    ///
    /// Marks the leaves of the larger subtree, then scans the adjacency of
    /// the smaller one.
    pub(crate) fn crossing_edges(&mut self, x: NodeRef, y: NodeRef) -> usize {
        let (small, large) = if self.leaf_count(x) <= self.leaf_count(y) {
            (x, y)
        } else {
            (y, x)
        };

        let n = self.num_leaves();
        let mut scratch = std::mem::take(&mut self.scratch);
        if scratch.marks.len() != n {
            scratch.marks = vec![0; n];
            scratch.stamp = 0;
        }
        scratch.stamp = scratch.stamp.wrapping_add(1);
        if scratch.stamp == 0 {
            scratch.marks.iter_mut().for_each(|m| *m = 0);
            scratch.stamp = 1;
        }
        let stamp = scratch.stamp;

        self.collect_leaves(large, &mut scratch.stack, &mut scratch.leaves);
        for &i in &scratch.leaves {
            scratch.marks[i] = stamp;
        }

        self.collect_leaves(small, &mut scratch.stack, &mut scratch.leaves);
        let mut count = 0;
        for &i in &scratch.leaves {
            count += self
                .graph
                .neighbors(i)
                .iter()
                .filter(|&&j| scratch.marks[j] == stamp)
                .count();
        }

        self.scratch = scratch;
        count
    }

    fn collect_leaves(&self, node: NodeRef, stack: &mut Vec<NodeRef>, leaves: &mut Vec<usize>) {
        stack.clear();
        leaves.clear();
        stack.push(node);
        while let Some(x) = stack.pop() {
            match x {
                NodeRef::Leaf(i) => leaves.push(i),
                NodeRef::Internal(k) => {
                    stack.push(self.internals[k].left);
                    stack.push(self.internals[k].right);
                }
            }
        }
    }
}
