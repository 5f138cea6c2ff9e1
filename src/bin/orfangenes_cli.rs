use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use orfangenes_rs::config::PipelineConfig;
use orfangenes_rs::search::DbType;
use orfangenes_rs::{run_pipeline, TREES_FILE};

#[derive(Parser)]
#[command(
    name = "orfangenes",
    version,
    about = "BLAST a gene set in parallel batches and summarize each gene's hits as a pruned taxonomy tree"
)]
struct Cli {
    /// Multi-record sequence file (plain or .gz)
    #[arg(short, long)]
    input: PathBuf,

    /// Taxonomy file: <taxid>\t<parentid>\t<name>\t<rank>
    #[arg(short, long)]
    taxdb: PathBuf,

    /// Directory for batch files, search results and trees.json
    #[arg(short, long, default_value = "out")]
    out: PathBuf,

    /// Taxonomy ID of the organism the input genes come from
    #[arg(long)]
    tax_id: u32,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Genes per search batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Database type: prot or nucl
    #[arg(long)]
    db_type: Option<DbType>,

    /// BLAST database name
    #[arg(long)]
    db: Option<String>,

    #[arg(long)]
    max_target_seqs: Option<u32>,

    #[arg(long)]
    evalue: Option<f64>,

    /// Concurrent search processes (0 = one per CPU)
    #[arg(short = 'j', long)]
    workers: Option<usize>,

    /// Per-batch timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn load_config(&self) -> orfangenes_rs::Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::load(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(size) = self.batch_size {
            config.batch.size = size;
        }
        if let Some(db_type) = self.db_type {
            config.search.db_type = db_type;
        }
        if let Some(db) = &self.db {
            config.search.database = db.clone();
        }
        if let Some(max) = self.max_target_seqs {
            config.search.max_target_seqs = max;
        }
        if let Some(evalue) = self.evalue {
            config.search.evalue = evalue;
        }
        if let Some(workers) = self.workers {
            config.search.max_workers = workers;
        }
        if let Some(timeout) = self.timeout {
            config.search.timeout_secs = Some(timeout);
        }
        config.validate()?;
        Ok(config)
    }
}

fn new_spinner(color: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
            .template(&format!("{{spinner:.{color}}} {{msg}}"))
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    // 1. Batch, search, and prune
    let spinner = new_spinner("green");
    spinner.set_message("Running BLAST. Be patient...");
    let results = match run_pipeline(&cli.input, &cli.taxdb, &cli.out, cli.tax_id, &config) {
        Ok(results) => results,
        Err(e) => {
            spinner.finish_with_message("Pipeline failed.");
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    spinner.finish_with_message(format!(
        "Searched {} gene(s) in {} batch(es).",
        results.genes.len(),
        results.search.outcomes.len()
    ));

    for failure in results.search.failures() {
        eprintln!("  warning: {failure}");
    }

    // 2. Write trees
    let spinner = new_spinner("yellow");
    spinner.set_message("Writing lineage trees...");
    let trees_path = cli.out.join(TREES_FILE);
    if let Err(e) = results.write_trees(&trees_path) {
        spinner.finish_with_message("Could not write trees.");
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }
    spinner.finish_with_message(format!(
        "Wrote {} tree(s) to {}",
        results.trees.len(),
        trees_path.display()
    ));

    if results.search.all_succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    }
}
