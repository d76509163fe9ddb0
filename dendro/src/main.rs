mod common;
mod common_io;
mod run_consensus;
mod run_fit;
mod run_merge;

use crate::common::*;
use run_consensus::*;
use run_fit::*;
use run_merge::*;

/// Hierarchical random graph models of networks.
///
/// Fit a dendrogram to an edge list by MCMC, sample its splits at a
/// temperature, and summarize them as a majority-rule consensus tree.
#[derive(Parser, Debug)]
#[command(version, about, long_about, term_width = 80)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fit an HRG dendrogram to a graph by MCMC
    Fit(FitArgs),
    /// Sample splits from a fitted dendrogram and build a consensus tree
    Consensus(ConsensusArgs),
    /// Merge split histograms of several runs into one consensus tree
    Merge(MergeArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.commands {
        Commands::Fit(args) => {
            run_fit(args)?;
        }
        Commands::Consensus(args) => {
            run_consensus(args)?;
        }
        Commands::Merge(args) => {
            run_merge(args)?;
        }
    }

    info!("Done");
    Ok(())
}
