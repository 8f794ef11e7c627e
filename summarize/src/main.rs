#[macro_use]
extern crate prettytable;

use std::error::Error;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use clap::Parser;
use framescope::analysis::{self, events_by_recorder};
use framescope::export::read_chrome_trace_file;
use framescope::{aggregate_events, Node};
use prettytable::Table;

#[derive(Parser, Debug)]
struct SummarizeOpt {
    file: PathBuf,

    /// Writes the analysis to a json file next to the input file
    #[arg(long = "json")]
    json: bool,

    /// Filter the output to items whose self-time is greater than this value
    #[arg(short = 'p', long = "percent-above", default_value = "0.0")]
    percent_above: f64,
}

#[derive(Parser, Debug)]
struct TreeOpt {
    file: PathBuf,

    /// Only show recorders matching this pattern (a trailing `*` matches any suffix)
    #[arg(short = 'r', long = "recorder")]
    recorder: Option<String>,

    /// Number of frames the trace covers; per-frame averages divide by it
    #[arg(short = 'f', long = "frames", default_value = "1")]
    frames: u32,
}

#[derive(Parser, Debug)]
enum Opt {
    /// Per-scope totals and self times over all recorders
    #[command(name = "summarize")]
    Summarize(SummarizeOpt),

    /// The aggregated call tree of each recorder
    #[command(name = "tree")]
    Tree(TreeOpt),
}

fn summarize(opt: SummarizeOpt) -> Result<(), Box<dyn Error + Send + Sync>> {
    let records = read_chrome_trace_file(&opt.file)?;
    let results = analysis::summarize(&records);

    if opt.json {
        let path = opt.file.with_extension("summary.json");
        let file = BufWriter::new(File::create(&path)?);
        serde_json::to_writer(file, &results)?;
        println!("Wrote {}", path.display());
        return Ok(());
    }

    let mut table = Table::new();

    table.add_row(row![
        "Item",
        "Self time",
        "% of total time",
        "Time",
        "Item count",
    ]);

    let total_time = results.total_time.as_nanos() as f64;
    let mut percent_total_time: f64 = 0.0;

    for scope_data in results.scope_data {
        let percent = (scope_data.self_time.as_nanos() as f64) / total_time * 100.0;

        if percent < opt.percent_above {
            continue;
        }
        percent_total_time += percent;

        table.add_row(row![
            scope_data.label,
            format!("{:.2?}", scope_data.self_time),
            format!("{:.3}", percent),
            format!("{:.2?}", scope_data.time),
            format!("{}", scope_data.invocation_count),
        ]);
    }

    table.printstd();

    println!("Total time: {:?}", results.total_time);

    if opt.percent_above > 0.0 {
        println!(
            "Filtered results account for {:.3}% of total time.",
            percent_total_time
        );
    }

    Ok(())
}

fn add_tree_rows(table: &mut Table, node: &Node) {
    let stats = node.stats();
    let indent = "  ".repeat(node.recursion_depth() as usize);

    table.add_row(row![
        format!("{}{}", indent, node.name()),
        format!("{:.3}", stats.avg_per_accounting_frame * 1e3),
        format!("{:.3}", stats.self_avg_per_accounting_frame * 1e3),
        format!("{}", stats.instance_count),
        format!("{:.3}", stats.min_time * 1e3),
        format!("{:.3}", stats.max_time * 1e3),
    ]);

    for child in node.children() {
        add_tree_rows(table, child);
    }
}

fn tree(opt: TreeOpt) -> Result<(), Box<dyn Error + Send + Sync>> {
    let records = read_chrome_trace_file(&opt.file)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    for (recorder, events) in events_by_recorder(&records) {
        if let Some(pattern) = &opt.recorder {
            let matches = match pattern.strip_suffix('*') {
                Some(prefix) => recorder.starts_with(prefix),
                None => recorder == *pattern,
            };
            if !matches {
                continue;
            }
        }

        let tree = aggregate_events(&events, opt.frames);

        let mut table = Table::new();
        table.add_row(row![
            "Scope",
            "ms/frame",
            "Self ms/frame",
            "Count",
            "Min ms",
            "Max ms",
        ]);
        for root in tree.roots() {
            add_tree_rows(&mut table, root);
        }

        writeln!(out, "{} ({} events)", recorder, events.len())?;
        table.print(&mut out)?;
        writeln!(out)?;
    }

    Ok(())
}

fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let opt = Opt::parse();

    match opt {
        Opt::Summarize(opt) => summarize(opt),
        Opt::Tree(opt) => tree(opt),
    }
}
