use flate2::read::GzDecoder;
use hrg::Graph;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

///
/// Open a file for reading, and return a buffered reader
/// * `input_file` - file name--either gzipped or not
pub fn open_buf_reader(input_file: &str) -> anyhow::Result<Box<dyn BufRead>> {
    let file = File::open(input_file)
        .map_err(|e| anyhow::anyhow!("failed to open {}: {}", input_file, e))?;
    match Path::new(input_file).extension().and_then(|x| x.to_str()) {
        Some("gz") => Ok(Box::new(BufReader::new(GzDecoder::new(file)))),
        _ => Ok(Box::new(BufReader::new(file))),
    }
}

///
/// Open a file for writing, and return a buffered writer
/// * `output_file` - file name--either gzipped or not
pub fn open_buf_writer(output_file: &str) -> anyhow::Result<Box<dyn Write>> {
    if output_file.eq_ignore_ascii_case("stdout") {
        return Ok(Box::new(BufWriter::new(std::io::stdout())));
    }

    let file = File::create(output_file)
        .map_err(|e| anyhow::anyhow!("failed to create {}: {}", output_file, e))?;
    match Path::new(output_file).extension().and_then(|x| x.to_str()) {
        Some("gz") => {
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            Ok(Box::new(BufWriter::new(encoder)))
        }
        _ => Ok(Box::new(BufWriter::new(file))),
    }
}

///
/// Create the parent directory of a file if needed
/// * `file` - file name
///
pub fn mkdir(file: &str) -> anyhow::Result<()> {
    if let Some(dir) = Path::new(file).parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    Ok(())
}

/// Read a whole (possibly gzipped) file into a string
pub fn read_string(input_file: &str) -> anyhow::Result<String> {
    let mut buf = open_buf_reader(input_file)?;
    let mut out = String::new();
    buf.read_to_string(&mut out)?;
    Ok(out)
}

/// Write a string to a (possibly gzipped) file, creating its directory
pub fn write_string(text: &str, output_file: &str) -> anyhow::Result<()> {
    mkdir(output_file)?;
    let mut buf = open_buf_writer(output_file)?;
    buf.write_all(text.as_bytes())?;
    if !text.ends_with('\n') {
        buf.write_all(b"\n")?;
    }
    buf.flush()?;
    Ok(())
}

fn is_comment_line(line: &str) -> bool {
    line.starts_with('#') || line.starts_with('%')
}

///
/// Read an undirected graph from an edge list: one whitespace-separated
/// pair of node labels per line. Blank lines and lines starting with `#`
/// or `%` are skipped; columns after the second are ignored.
///
/// * `input_file` - file name--either gzipped or not
///
pub fn read_edge_list(input_file: &str) -> anyhow::Result<Graph> {
    let buf = open_buf_reader(input_file)?;
    let mut edges: Vec<(Box<str>, Box<str>)> = vec![];

    for (lineno, line) in buf.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || is_comment_line(line) {
            continue;
        }
        let mut words = line.split_whitespace();
        match (words.next(), words.next()) {
            (Some(a), Some(b)) => edges.push((a.into(), b.into())),
            _ => {
                return Err(anyhow::anyhow!(
                    "{}:{}: expected two node labels, found {:?}",
                    input_file,
                    lineno + 1,
                    line
                ))
            }
        }
    }

    Ok(Graph::from_edges(edges))
}

///
/// Output prefix derived from an input file: directory and base name with
/// the extension (and a trailing `.gz`) removed
///
pub fn default_prefix(input_file: &str) -> String {
    let trimmed = input_file.strip_suffix(".gz").unwrap_or(input_file);
    let path = Path::new(trimmed);
    match (path.parent(), path.file_stem().and_then(|x| x.to_str())) {
        (Some(dir), Some(stem)) if !dir.as_os_str().is_empty() => {
            dir.join(stem).to_string_lossy().into_owned()
        }
        (_, Some(stem)) => stem.to_string(),
        _ => trimmed.to_string(),
    }
}
