//! Hierarchical random graph (HRG) models of networks.
//!
//! A dendrogram over the nodes of a graph assigns every internal node `r`
//! a connection probability `p_r = E_r / (L_r R_r)` between the leaves
//! under its two children. The model is fitted by Metropolis moves that
//! rearrange one internal node and its parent, and summarized by a
//! majority-rule consensus of the splits it visits.
//!
//! # Model
//!
//! Bernoulli likelihood of the observed edges, maximized per node:
//! `ℓ_r = E_r ln p_r + (L_r R_r - E_r) ln(1 - p_r)`.
//!
//! # References
//!
//! Clauset, Moore & Newman (2008). "Hierarchical structure and the
//! prediction of missing links in networks." Nature 453, 98-101.

#![deny(missing_docs)]
#![deny(warnings)]

/// Error type shared by the crate
pub mod error;

/// Immutable undirected graph with canonical node order
pub mod graph;

/// Per-node Bernoulli log-likelihood
pub mod model;

/// Arena dendrogram with cached statistics
pub mod dendrogram;

/// Monte Carlo moves and Metropolis acceptance
pub mod mcmc;

/// Canonical splits and split histograms
pub mod splits;

/// Majority-rule consensus trees
pub mod consensus;

/// Fitting and split-sampling loops
pub mod inference;

/// Dendrogram persistence and Newick output
pub mod io;


pub use consensus::{ConsensusBuilder, ConsensusTree};
pub use dendrogram::{Dendrogram, NodeRef};
pub use error::{HrgError, Result};
pub use graph::Graph;
pub use inference::{
    fit, sample_consensus, ConsensusOptions, FitOptions, FitSummary, McmcRunner,
    SamplingSchedule, StepReport,
};
pub use io::DendrogramRecord;
pub use splits::{Split, SplitHistogram};
