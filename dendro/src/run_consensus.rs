use crate::common::*;
use hrg::{sample_consensus, ConsensusOptions, SamplingSchedule};

#[derive(Args, Debug)]
pub struct ConsensusArgs {
    #[arg(help = "Edge list file the model was fitted to")]
    edge_file: Box<str>,

    #[arg(help = "Fitted model (`*-hrg.json`)")]
    model_file: Box<str>,

    #[arg(
        short = 's',
        long = "samples",
        default_value_t = 10_000,
        help = "Number of split samples"
    )]
    num_samples: usize,

    #[arg(
        short = 't',
        long,
        default_value_t = 2.0,
        help = "Sampling temperature",
        long_help = "Metropolis temperature of the sampling walk. \n\
		     Higher temperatures accept more downhill moves and \n\
		     spread the samples over more dendrograms."
    )]
    temperature: f64,

    #[arg(long, default_value_t = 42, help = "Random seed")]
    seed: u64,

    #[arg(
        short,
        long,
        help = "Output prefix",
        long_help = "Output prefix. Files are written as \n\
		     `{out}-consensus-temp-{T}-histogram.json`, \n\
		     `{out}-consensus-temp-{T}-dendrogram.json` and \n\
		     `{out}-consensus-temp-{T}-dendrogram.nwk`, \n\
		     with `{T}` printed to two decimals (`2.00`). \n\
		     Defaults to the edge list file name without its extension."
    )]
    out: Option<Box<str>>,

    #[arg(long, default_value_t = 4096, help = "Log status every this many moves")]
    report_every: usize,

    #[arg(short, long, help = "Verbosity")]
    verbose: bool,
}

/// `{out}-consensus-temp-{T}` with `T` to two decimals
fn output_prefix(args: &ConsensusArgs) -> String {
    let prefix = match args.out.as_deref() {
        Some(out) => out.to_string(),
        None => default_prefix(&args.edge_file),
    };
    format!("{}-consensus-temp-{:.2}", prefix, args.temperature)
}

pub fn run_consensus(args: &ConsensusArgs) -> anyhow::Result<()> {
    init_logger(args.verbose);

    let graph = read_edge_list(&args.edge_file)?;
    let mut dendrogram = Dendrogram::from_json(&read_string(&args.model_file)?, &graph)?;
    info!(
        "loaded model {} over {} nodes, log-likelihood {:.6}",
        args.model_file,
        dendrogram.num_leaves(),
        dendrogram.loglik()
    );

    let options = ConsensusOptions {
        num_samples: args.num_samples,
        temperature: args.temperature,
        seed: args.seed,
        report_every: args.report_every,
    };
    let schedule = SamplingSchedule::for_graph(graph.num_nodes());
    let mut rng = options.rng();

    let pb = ProgressBar::new(options.num_samples as u64);
    if args.verbose {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }

    let histogram = sample_consensus(
        &mut dendrogram,
        &options,
        &schedule,
        &mut rng,
        |_, d| -> anyhow::Result<()> {
            pb.set_position(d.num_samples());
            Ok(())
        },
    )?;
    pb.finish_and_clear();

    let prefix = output_prefix(args);

    let histogram_file = format!("{}-histogram.json", prefix);
    write_string(&histogram.to_json()?, &histogram_file)?;
    info!(
        "wrote {} distinct splits over {} samples to {}",
        histogram.len(),
        histogram.num_samples(),
        histogram_file
    );

    let tree = ConsensusBuilder::new().build(graph.labels(), &[histogram])?;
    write_consensus(&tree, &format!("{}-dendrogram", prefix))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;
    use std::path::Path;
    use tempfile::tempdir;

    #[test]
    fn test_output_prefix_temperature_digits() {
        let mut args = ConsensusArgs {
            edge_file: "data/net.txt.gz".into(),
            model_file: "data/net-hrg.json".into(),
            num_samples: 1,
            temperature: 2.0,
            seed: 1,
            out: None,
            report_every: 0,
            verbose: false,
        };
        assert_eq!(output_prefix(&args), "data/net-consensus-temp-2.00");

        args.temperature = 0.5;
        args.out = Some("runs/a".into());
        assert_eq!(output_prefix(&args), "runs/a-consensus-temp-0.50");
    }

    #[test]
    fn test_consensus_outputs() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let edge_file = dir.path().join("cliques.txt.gz").to_string_lossy().into_owned();
        let mut lines = String::from("# two triangles\n");
        for (a, b) in [(0, 1), (0, 2), (1, 2), (3, 4), (3, 5), (4, 5)] {
            lines.push_str(&format!("{} {}\n", a, b));
        }
        write_string(&lines, &edge_file)?;

        let graph = read_edge_list(&edge_file)?;
        let mut rng = SmallRng::seed_from_u64(7);
        let model = Dendrogram::from_graph(&graph, &mut rng)?;
        let model_file = dir.path().join("cliques-hrg.json").to_string_lossy().into_owned();
        write_string(&model.to_json()?, &model_file)?;

        let out = dir.path().join("run").to_string_lossy().into_owned();
        run_consensus(&ConsensusArgs {
            edge_file: edge_file.into(),
            model_file: model_file.into(),
            num_samples: 50,
            temperature: 1.5,
            seed: 1,
            out: Some(out.clone().into()),
            report_every: 0,
            verbose: false,
        })?;

        let histogram = SplitHistogram::from_json(&read_string(&format!(
            "{}-consensus-temp-1.50-histogram.json",
            out
        ))?)?;
        assert_eq!(histogram.num_samples(), 50);

        let newick = read_string(&format!("{}-consensus-temp-1.50-dendrogram.nwk", out))?;
        assert!(newick.trim().starts_with('('));
        assert!(newick.trim().ends_with(';'));
        assert!(Path::new(&format!("{}-consensus-temp-1.50-dendrogram.json", out)).exists());
        Ok(())
    }
}
