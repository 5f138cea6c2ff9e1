//src/batch.rs

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};
use crate::sequence::write_genes;
use crate::types::Gene;

pub const DEFAULT_BATCH_SIZE: usize = 3;

/// Path of the query file for 1-based batch `index`.
pub fn batch_input_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("sequence{index}.fasta"))
}

/// The batch files written by [`partition`].
#[derive(Debug, Clone, Default)]
pub struct BatchPlan {
    /// One path per batch, in batch order.
    pub files: Vec<PathBuf>,
    /// Batches whose file could not be written.
    pub write_failures: Vec<usize>,
}

impl BatchPlan {
    pub fn batch_count(&self) -> usize {
        self.files.len()
    }
}

/// Split `genes` into consecutive groups of `batch_size` and write each group
/// to `dir/sequence{i}.fasta`. The last group may be smaller.
///
/// Write failures are logged and recorded in the plan; they do not stop the
/// remaining batches from being written.
pub fn partition(genes: &[Gene], batch_size: usize, dir: &Path) -> Result<BatchPlan> {
    if batch_size == 0 {
        return Err(PipelineError::InvalidBatchSize);
    }
    std::fs::create_dir_all(dir)?;

    let mut plan = BatchPlan::default();
    for (i, chunk) in genes.chunks(batch_size).enumerate() {
        let index = i + 1;
        let path = batch_input_path(dir, index);
        let written = File::create(&path).and_then(|f| write_genes(BufWriter::new(f), chunk));
        if let Err(e) = written {
            log::warn!("Could not write batch {index} to {}: {e}", path.display());
            plan.write_failures.push(index);
        }
        plan.files.push(path);
    }

    log::info!(
        "Partitioned {} gene(s) into {} batch(es) of up to {batch_size}",
        genes.len(),
        plan.batch_count()
    );
    Ok(plan)
}
