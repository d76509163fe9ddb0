use crate::common::*;
use std::path::Path;

#[derive(Args, Debug)]
pub struct MergeArgs {
    #[arg(help = "Edge list file the histograms were sampled from")]
    edge_file: Box<str>,

    #[arg(
        required = true,
        num_args = 1..,
        help = "Split histograms (`*-histogram.json`)",
        long_help = "Split histograms written by `consensus`. All of them must \n\
		     cover the graph's nodes and hold the same number of samples."
    )]
    histogram_files: Vec<Box<str>>,

    #[arg(
        short,
        long,
        required = true,
        help = "Output prefix",
        long_help = "Output prefix. The consensus tree is written to `{out}.json` \n\
		     and `{out}.nwk`, the merged histogram to `{out}-histogram.json`."
    )]
    out: Box<str>,

    #[arg(long, help = "Overwrite existing output files")]
    force: bool,

    #[arg(short, long, help = "Verbosity")]
    verbose: bool,
}

/// Output files of a merge, in the order they are written
fn merge_outputs(prefix: &str) -> [String; 3] {
    [
        format!("{}-histogram.json", prefix),
        format!("{}.json", prefix),
        format!("{}.nwk", prefix),
    ]
}

pub fn run_merge(args: &MergeArgs) -> anyhow::Result<()> {
    init_logger(args.verbose);

    let prefix = args.out.strip_suffix(".json").unwrap_or(&args.out);
    let outputs = merge_outputs(prefix);
    if !args.force {
        if let Some(existing) = outputs.iter().find(|f| Path::new(f.as_str()).exists()) {
            return Err(anyhow::anyhow!(
                "output file {} exists; won't overwrite without --force",
                existing
            ));
        }
    }

    let graph = read_edge_list(&args.edge_file)?;

    let mut histograms = Vec::with_capacity(args.histogram_files.len());
    for file in args.histogram_files.iter() {
        let hist = SplitHistogram::from_json(&read_string(file)?)
            .map_err(|e| anyhow::anyhow!("{}: {}", file, e))?;
        info!(
            "{}: {} samples, {} distinct splits",
            file,
            hist.num_samples(),
            hist.len()
        );
        histograms.push(hist);
    }

    let tree = ConsensusBuilder::new().build(graph.labels(), &histograms)?;

    let merged = SplitHistogram::merge(&histograms)?;
    write_string(&merged.to_json()?, &outputs[0])?;
    write_consensus(&tree, prefix)?;
    info!(
        "merged {} histograms ({} samples) into {}",
        histograms.len(),
        merged.num_samples(),
        prefix
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hrg::Split;
    use tempfile::tempdir;

    fn write_fixture(dir: &Path, name: &str, num_samples: u64) -> anyhow::Result<String> {
        let mut hist = SplitHistogram::new((0..4).map(|i| i.to_string()).collect());
        let split = Split::from_members(4, [2, 3])?;
        for _ in 0..num_samples {
            hist.record([split.clone()])?;
        }
        let file = dir.join(name).to_string_lossy().into_owned();
        write_string(&hist.to_json()?, &file)?;
        Ok(file)
    }

    fn merge_args(dir: &Path, histogram_files: Vec<String>, force: bool) -> MergeArgs {
        let edge_file = dir.join("path.txt").to_string_lossy().into_owned();
        MergeArgs {
            edge_file: edge_file.into(),
            histogram_files: histogram_files.into_iter().map(Into::into).collect(),
            out: dir.join("merged").to_string_lossy().into_owned().into(),
            force,
            verbose: false,
        }
    }

    #[test]
    fn test_merge_writes_consensus() -> anyhow::Result<()> {
        let dir = tempdir()?;
        write_string("0 1\n1 2\n2 3\n", &dir.path().join("path.txt").to_string_lossy())?;
        let a = write_fixture(dir.path(), "a.json", 10)?;
        let b = write_fixture(dir.path(), "b.json", 10)?;

        run_merge(&merge_args(dir.path(), vec![a.clone(), b.clone()], false))?;

        let newick = read_string(&dir.path().join("merged.nwk").to_string_lossy())?;
        assert_eq!(newick.trim(), "((0,1)1.000,(2,3)1.000);");

        let merged = SplitHistogram::from_json(&read_string(
            &dir.path().join("merged-histogram.json").to_string_lossy(),
        )?)?;
        assert_eq!(merged.num_samples(), 20);

        // outputs exist now
        assert!(run_merge(&merge_args(dir.path(), vec![a.clone(), b.clone()], false)).is_err());
        run_merge(&merge_args(dir.path(), vec![a, b], true))?;
        Ok(())
    }

    #[test]
    fn test_merge_rejects_unequal_samples() -> anyhow::Result<()> {
        let dir = tempdir()?;
        write_string("0 1\n1 2\n2 3\n", &dir.path().join("path.txt").to_string_lossy())?;
        let a = write_fixture(dir.path(), "a.json", 10)?;
        let b = write_fixture(dir.path(), "b.json", 12)?;

        let err = run_merge(&merge_args(dir.path(), vec![a, b], false)).unwrap_err();
        assert!(err.to_string().contains("inconsistent number of samples"));
        assert!(!dir.path().join("merged.nwk").exists());
        Ok(())
    }
}
