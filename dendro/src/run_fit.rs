use crate::common::*;
use hrg::{fit, FitOptions};

#[derive(Args, Debug)]
pub struct FitArgs {
    #[arg(
        help = "Edge list file",
        long_help = "Undirected graph as an edge list: two whitespace-separated \n\
		     node labels per line, `#` or `%` comment lines, \n\
		     optionally gzipped (.gz)."
    )]
    edge_file: Box<str>,

    #[arg(
        short = 's',
        long = "steps",
        default_value_t = 100_000,
        help = "Number of Monte Carlo moves"
    )]
    num_steps: usize,

    #[arg(long, default_value_t = 42, help = "Random seed")]
    seed: u64,

    #[arg(
        short,
        long,
        help = "Output prefix",
        long_help = "Output prefix. The model is written to `{out}-hrg.json`. \n\
		     Defaults to the edge list file name without its extension."
    )]
    out: Option<Box<str>>,

    #[arg(
        long,
        help = "Start from a saved model",
        long_help = "Continue fitting from a dendrogram saved by a previous run \n\
		     instead of a random one. The model must have been fitted \n\
		     to the same graph."
    )]
    init: Option<Box<str>>,

    #[arg(long, default_value_t = 4096, help = "Log status every this many moves")]
    report_every: usize,

    #[arg(short, long, help = "Verbosity")]
    verbose: bool,
}

pub fn run_fit(args: &FitArgs) -> anyhow::Result<()> {
    init_logger(args.verbose);

    let graph = read_edge_list(&args.edge_file)?;
    info!(
        "read {} nodes and {} edges from {}",
        graph.num_nodes(),
        graph.num_edges(),
        args.edge_file
    );

    let options = FitOptions {
        num_steps: args.num_steps,
        seed: args.seed,
        report_every: args.report_every,
    };
    let mut rng = options.rng();

    let mut dendrogram = match args.init.as_deref() {
        Some(model_file) => Dendrogram::from_json(&read_string(model_file)?, &graph)?,
        None => Dendrogram::from_graph(&graph, &mut rng)?,
    };

    let prefix = match args.out.as_deref() {
        Some(out) => out.to_string(),
        None => default_prefix(&args.edge_file),
    };
    let model_file = format!("{}-hrg.json", prefix);
    write_string(&dendrogram.to_json()?, &model_file)?;

    let pb = ProgressBar::new(options.num_steps as u64);
    if args.verbose {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }

    let summary = fit(
        &mut dendrogram,
        &options,
        &mut rng,
        |report, d| -> anyhow::Result<()> {
            if report.improved {
                write_string(&d.to_json()?, &model_file)?;
            }
            pb.inc(1);
            Ok(())
        },
    )?;
    pb.finish_and_clear();

    info!(
        "best log-likelihood {:.6} at step {} of {}; saved to {}",
        summary.best_loglik, summary.best_iteration, summary.num_steps, model_file
    );
    Ok(())
}
