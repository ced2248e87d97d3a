mod display;
mod pipeline;

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use chrono::Datelike;
use clap::{Args, Parser, Subcommand};
use shisetsu_core::{TsvCollector, WardConfig};
use shisetsu_store::{DuckStore, FlatFileSink, LoadSink};

#[derive(Parser)]
#[command(name = "shisetsu", version, about = "Normalise and load municipal facility reservations")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the built-in ward presets.
    Wards {
        /// Print presets as JSON, usable as `--config` templates.
        #[arg(long)]
        json: bool,
    },
    /// Aggregate scraped rows and replace the ward's rows in a sink.
    Load(LoadArgs),
    /// Pretty-print stored rows from a DuckDB table.
    Show {
        #[arg(long, env = "SHISETSU_DB")]
        db: PathBuf,
        #[arg(long, env = "SHISETSU_TABLE", default_value = "reservation")]
        table: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Args)]
struct LoadArgs {
    /// Scraped-row TSV file, or a directory holding `<ward>.tsv` files.
    #[arg(long)]
    input: PathBuf,
    /// Built-in ward preset; repeat to load several wards in turn.
    #[arg(long = "ward", required_unless_present = "config", conflicts_with = "config")]
    wards: Vec<String>,
    /// Ward configuration JSON file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Year assumed for month/day dates (default: a `# 2023年` comment in the
    /// input, else the current year).
    #[arg(long)]
    year: Option<i32>,
    /// Flat-file output; takes precedence over `--db`.
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long, env = "SHISETSU_DB")]
    db: Option<PathBuf>,
    #[arg(long, env = "SHISETSU_TABLE", default_value = "reservation")]
    table: String,
    /// Print the aggregated batch instead of loading it.
    #[arg(long)]
    dry_run: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();
    tracing::debug!("shisetsu v{}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();
    match cli.command {
        Command::Wards { json } => {
            let presets = shisetsu_core::ward::presets();
            if json {
                println!("{}", serde_json::to_string_pretty(&presets)?);
            } else {
                display::print_wards(&presets);
            }
        }
        Command::Load(args) => load(args)?,
        Command::Show { db, table, limit } => {
            let store = DuckStore::open_persistent(&db)
                .with_context(|| format!("opening {}", db.display()))?
                .with_table(&table)?;
            let batches = store
                .query_arrow(&format!("SELECT * FROM {} LIMIT {limit}", store.table()))
                .with_context(|| format!("reading table {table}"))?;
            display::print_batches(&batches)?;
            eprintln!("  {} rows in {table}", store.count()?);
        }
    }
    Ok(())
}

fn load(args: LoadArgs) -> anyhow::Result<()> {
    let wards = match &args.config {
        Some(path) => vec![
            WardConfig::from_path(path).with_context(|| format!("loading {}", path.display()))?,
        ],
        None => args
            .wards
            .iter()
            .map(|name| WardConfig::preset(name))
            .collect::<Result<Vec<_>, _>>()?,
    };
    if wards.len() > 1 && !args.input.is_dir() {
        bail!("several wards need --input to be a directory of <ward>.tsv files");
    }
    if args.dry_run {
        for ward in &wards {
            let mut collector = open_input(&args.input, ward)?;
            let year = initial_year(args.year, &mut collector)?;
            let batch = pipeline::collect_batch(ward, &mut collector, year)?;
            display::print_batch_summary(&batch);
            display::print_batches(&[batch.to_record_batch(&ward.columns)?])?;
        }
        return Ok(());
    }

    let mut sink: Box<dyn LoadSink> = match (&args.out, &args.db) {
        (Some(out), _) => Box::new(FlatFileSink::new(out)),
        (None, Some(db)) => Box::new(
            DuckStore::open_persistent(db)
                .with_context(|| format!("opening {}", db.display()))?
                .with_table(&args.table)?,
        ),
        (None, None) => bail!("one of --out or --db (or SHISETSU_DB) is required"),
    };

    for ward in &wards {
        let mut collector = open_input(&args.input, ward)?;
        let year = initial_year(args.year, &mut collector)?;
        let report = pipeline::run_ward(ward, &mut collector, year, sink.as_mut())?;
        display::print_report(&report);
    }
    Ok(())
}

fn open_input(input: &Path, ward: &WardConfig) -> anyhow::Result<TsvCollector<BufReader<File>>> {
    let path = if input.is_dir() {
        input.join(format!("{}.tsv", ward.name))
    } else {
        input.to_path_buf()
    };
    let file = File::open(&path)
        .with_context(|| format!("opening scraped rows for ward {}: {}", ward.name, path.display()))?;
    Ok(TsvCollector::new(BufReader::new(file)))
}

fn initial_year(
    flag: Option<i32>,
    collector: &mut TsvCollector<BufReader<File>>,
) -> anyhow::Result<i32> {
    if let Some(year) = flag {
        return Ok(year);
    }
    Ok(collector
        .year_hint()?
        .unwrap_or_else(|| chrono::Local::now().year()))
}
