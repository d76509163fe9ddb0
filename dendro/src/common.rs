pub use crate::common_io::*;

pub use clap::{Args, Parser, Subcommand};
pub use hrg::{ConsensusBuilder, ConsensusTree, Dendrogram, SplitHistogram};
pub use indicatif::{ProgressBar, ProgressDrawTarget};
pub use log::info;

/// Start logging; `verbose` turns on `info` unless `RUST_LOG` says otherwise
pub fn init_logger(verbose: bool) {
    if verbose && std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "info");
    }
    // subcommand tests run in one process; only the first call installs
    let _ = env_logger::try_init();
}

/// Write a consensus tree as `{prefix}.json` and `{prefix}.nwk`
pub fn write_consensus(tree: &ConsensusTree, prefix: &str) -> anyhow::Result<()> {
    let json_file = format!("{}.json", prefix);
    let newick_file = format!("{}.nwk", prefix);
    write_string(&tree.to_json()?, &json_file)?;
    write_string(&tree.to_newick_with_support(), &newick_file)?;
    info!("wrote {} and {}", json_file, newick_file);
    Ok(())
}
