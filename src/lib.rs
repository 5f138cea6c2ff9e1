// src/lib.rs
pub mod batch;
pub mod config;
pub mod error;
pub mod hits;
pub mod lineage;
pub mod search;
pub mod sequence;
pub mod taxdb;
pub mod types;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::batch::partition;
use crate::config::PipelineConfig;
use crate::hits::group_by_gene;
use crate::lineage::process_all;
use crate::search::{BlastTool, SearchOrchestrator, SearchReport, SearchTool};
use crate::sequence::read_genes;
use crate::taxdb::parse_taxdb;
use crate::types::{Gene, GeneTree};

pub use crate::error::{PipelineError, Result};

/// File the lineage trees are written to inside the output directory.
pub const TREES_FILE: &str = "trees.json";

/// Everything a pipeline run produced.
pub struct PipelineResults {
    /// Genes parsed from the input, in input order
    pub genes: Vec<Gene>,
    /// Per-batch search outcomes and the combined result file
    pub search: SearchReport,
    /// One tree per gene with a resolvable lineage, in gene order
    pub trees: Vec<GeneTree>,
}

impl PipelineResults {
    /// The trees as a pretty-printed JSON array.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.trees)?)
    }

    pub fn write_trees<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_trees(&self.trees, path)
    }
}

pub fn write_trees<P: AsRef<Path>>(trees: &[GeneTree], path: P) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path.as_ref())?);
    serde_json::to_writer_pretty(&mut writer, trees)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

/// Run the whole pipeline with BLAST+ as the search tool.
pub fn run_pipeline(
    input_path: &Path,
    taxdb_path: &Path,
    out_dir: &Path,
    input_tax_id: u32,
    config: &PipelineConfig,
) -> Result<PipelineResults> {
    let tool = BlastTool::from_config(&config.search);
    run_pipeline_with(Box::new(tool), input_path, taxdb_path, out_dir, input_tax_id, config)
}

/// Run the whole pipeline with any search tool.
pub fn run_pipeline_with(
    tool: Box<dyn SearchTool>,
    input_path: &Path,
    taxdb_path: &Path,
    out_dir: &Path,
    input_tax_id: u32,
    config: &PipelineConfig,
) -> Result<PipelineResults> {
    config.validate()?;
    std::fs::create_dir_all(out_dir)?;

    // 1. Parse genes; a missing input aborts before anything is written
    let genes = read_genes(input_path, input_tax_id)?;

    // 2. Write batch files
    let plan = partition(&genes, config.batch.size, out_dir)?;

    // 3. Search every batch and merge the results
    let orchestrator = SearchOrchestrator::new(tool, config.search.clone());
    let search = orchestrator.run(&plan, out_dir)?;
    let failed = search.failures().count();
    if failed > 0 {
        log::warn!(
            "{failed} of {} search batch(es) failed; their genes will have no hits",
            search.outcomes.len()
        );
    }

    // 4. Group hits by gene
    let hits = group_by_gene(&search.combined)?;

    // 5. Load the reference taxonomy and prune one tree per gene
    let reference = parse_taxdb(taxdb_path)?;
    let trees = process_all(&genes, &hits, &reference);

    Ok(PipelineResults {
        genes,
        search,
        trees,
    })
}
