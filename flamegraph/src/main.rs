use std::error::Error;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use clap::Parser;
use framescope::analysis::collapse_stacks;
use framescope::export::read_chrome_trace_file;
use inferno::flamegraph::{from_lines, Options as FlamegraphOptions};

#[derive(Parser, Debug)]
struct Opt {
    /// A trace written by `framescope::export`
    file: PathBuf,

    /// Where to write the SVG
    #[arg(short = 'o', long = "output", default_value = "framescope.svg")]
    output: PathBuf,
}

fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let opt = Opt::parse();

    let records = read_chrome_trace_file(&opt.file)?;

    let mut recorded_stacks = collapse_stacks(&records)
        .iter()
        .filter(|&(_, &count)| count > 0)
        .map(|(unique_stack, count)| format!("{} {}", unique_stack, count))
        .collect::<Vec<_>>();
    recorded_stacks.sort();

    if recorded_stacks.is_empty() {
        return Err(format!("`{}` contains no events", opt.file.display()).into());
    }

    let file = BufWriter::new(File::create(&opt.output)?);
    let mut flamegraph_options = FlamegraphOptions::default();
    flamegraph_options.count_name = "µs".to_owned();

    from_lines(
        &mut flamegraph_options,
        recorded_stacks.iter().map(|s| s.as_ref()),
        file,
    )
    .map_err(|e| format!("unable to generate a flamegraph from the collapsed stack data: {}", e))?;

    println!("Wrote {}", opt.output.display());
    Ok(())
}
