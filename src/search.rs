//src/search.rs

use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::str::FromStr;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::batch::{batch_input_path, BatchPlan};
use crate::error::{PipelineError, Result};

/// Tabular output columns requested from BLAST. Downstream only relies on the
/// first two (query id, subject taxids).
pub const BLAST_OUTFMT: &str = "6 qseqid staxids bitscore evalue pident length";

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Path of the result file for 1-based batch `index`.
pub fn batch_output_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("blastResults{index}.bl"))
}

pub fn combined_results_path(dir: &Path) -> PathBuf {
    dir.join("blastResults.bl")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    Prot,
    Nucl,
}

impl FromStr for DbType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "prot" | "protein" => Ok(DbType::Prot),
            "nucl" | "nucleotide" => Ok(DbType::Nucl),
            other => Err(format!("unknown database type '{other}' (expected prot or nucl)")),
        }
    }
}

/// Search parameters and scheduling limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub db_type: DbType,
    pub database: String,
    pub max_target_seqs: u32,
    pub evalue: f64,
    /// Run BLAST against NCBI servers instead of a local database.
    pub remote: bool,
    /// Directory holding the BLAST+ executables; `PATH` is used when unset.
    pub blast_bin_dir: Option<PathBuf>,
    /// Concurrent search processes. 0 means one per CPU.
    pub max_workers: usize,
    /// Minimum gap between two process launches.
    pub launch_delay_ms: u64,
    /// Per-batch wall clock limit; unlimited when unset.
    pub timeout_secs: Option<u64>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            db_type: DbType::Prot,
            database: "nr".to_string(),
            max_target_seqs: 500,
            evalue: 1e-3,
            remote: false,
            blast_bin_dir: None,
            max_workers: 0,
            launch_delay_ms: 0,
            timeout_secs: None,
        }
    }
}

impl SearchConfig {
    /// Worker count actually used for `batch_count` batches.
    pub fn worker_count(&self, batch_count: usize) -> usize {
        let wanted = if self.max_workers == 0 {
            num_cpus::get()
        } else {
            self.max_workers
        };
        wanted.min(batch_count).max(1)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// An external similarity-search executable.
pub trait SearchTool: Send + Sync {
    fn name(&self) -> &str;

    /// Command that searches `query` and writes tabular hits to `output`.
    fn command(&self, query: &Path, output: &Path) -> Command;
}

/// BLAST+ (`blastp` / `blastn`).
#[derive(Debug, Clone)]
pub struct BlastTool {
    db_type: DbType,
    database: String,
    max_target_seqs: u32,
    evalue: f64,
    remote: bool,
    bin_dir: Option<PathBuf>,
}

impl BlastTool {
    pub fn from_config(config: &SearchConfig) -> Self {
        Self {
            db_type: config.db_type,
            database: config.database.clone(),
            max_target_seqs: config.max_target_seqs,
            evalue: config.evalue,
            remote: config.remote,
            bin_dir: config.blast_bin_dir.clone(),
        }
    }

    fn program(&self) -> &'static str {
        match self.db_type {
            DbType::Prot => "blastp",
            DbType::Nucl => "blastn",
        }
    }
}

impl SearchTool for BlastTool {
    fn name(&self) -> &str {
        self.program()
    }

    fn command(&self, query: &Path, output: &Path) -> Command {
        let binary = match &self.bin_dir {
            Some(dir) => dir.join(self.program()),
            None => PathBuf::from(self.program()),
        };
        let mut cmd = Command::new(binary);
        cmd.arg("-query").arg(query)
            .arg("-db").arg(&self.database)
            .arg("-out").arg(output)
            .arg("-outfmt").arg(BLAST_OUTFMT)
            .arg("-max_target_seqs").arg(self.max_target_seqs.to_string())
            .arg("-evalue").arg(self.evalue.to_string());
        if self.remote {
            cmd.arg("-remote");
        }
        cmd
    }
}

/// How one batch's search ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchStatus {
    Completed,
    /// Non-zero exit, or killed by a signal (`code` is `None`).
    Failed { code: Option<i32>, stderr: String },
    TimedOut,
    /// The process could not be started or waited on.
    ProcessError(String),
    /// Exited successfully but wrote no result file.
    MissingOutput,
    /// The batch's query file could not be written, so it was never searched.
    InputUnavailable,
}

#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub index: usize,
    pub status: BatchStatus,
    pub elapsed: Duration,
}

impl BatchOutcome {
    pub fn is_success(&self) -> bool {
        self.status == BatchStatus::Completed
    }
}

impl fmt::Display for BatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch {}: ", self.index)?;
        match &self.status {
            BatchStatus::Completed => write!(f, "completed"),
            BatchStatus::Failed { code: Some(code), stderr } => {
                write!(f, "exited with code {code}: {}", stderr.trim())
            }
            BatchStatus::Failed { code: None, stderr } => {
                write!(f, "killed by signal: {}", stderr.trim())
            }
            BatchStatus::TimedOut => write!(f, "timed out after {:.1?}", self.elapsed),
            BatchStatus::ProcessError(msg) => write!(f, "{msg}"),
            BatchStatus::MissingOutput => write!(f, "no result file written"),
            BatchStatus::InputUnavailable => write!(f, "query file not written, not searched"),
        }
    }
}

/// Result of [`SearchOrchestrator::run`].
#[derive(Debug, Clone)]
pub struct SearchReport {
    pub combined: PathBuf,
    /// One entry per batch, in batch order.
    pub outcomes: Vec<BatchOutcome>,
}

impl SearchReport {
    pub fn failures(&self) -> impl Iterator<Item = &BatchOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    pub fn all_succeeded(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// Enforces a minimum gap between process launches across all workers.
struct LaunchGate {
    delay: Duration,
    next: Mutex<Option<Instant>>,
}

impl LaunchGate {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            next: Mutex::new(None),
        }
    }

    /// Block until this caller may launch. The lock is held while sleeping so
    /// launches are handed out one slot at a time.
    fn wait_turn(&self) {
        if self.delay.is_zero() {
            return;
        }
        let mut next = self.next.lock();
        if let Some(at) = *next {
            let now = Instant::now();
            if at > now {
                thread::sleep(at - now);
            }
        }
        *next = Some(Instant::now() + self.delay);
    }
}

/// Runs one search per batch on a bounded worker pool, then merges the
/// per-batch result files in batch order.
pub struct SearchOrchestrator {
    tool: Box<dyn SearchTool>,
    config: SearchConfig,
}

impl SearchOrchestrator {
    pub fn new(tool: Box<dyn SearchTool>, config: SearchConfig) -> Self {
        Self { tool, config }
    }

    /// Search every batch of `plan` found in `dir` and write the combined
    /// result file there. Individual batch failures are reported in the
    /// returned outcomes, not as an error, and only completed batches are
    /// merged.
    pub fn run(&self, plan: &BatchPlan, dir: &Path) -> Result<SearchReport> {
        let batch_count = plan.batch_count();
        let started = Instant::now();
        let outcomes = if batch_count == 0 {
            Vec::new()
        } else {
            let workers = self.config.worker_count(batch_count);
            log::info!(
                "Running {} on {batch_count} batch(es) with {workers} worker(s)",
                self.tool.name()
            );
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(|i| format!("search-{i}"))
                .build()?;
            let gate = LaunchGate::new(Duration::from_millis(self.config.launch_delay_ms));

            // collect() keeps batch order regardless of completion order
            pool.install(|| {
                (1..=batch_count)
                    .into_par_iter()
                    .map(|index| {
                        if plan.write_failures.contains(&index) {
                            skip_batch(index, dir)
                        } else {
                            self.run_batch(index, dir, &gate)
                        }
                    })
                    .collect::<Vec<_>>()
            })
        };

        log::info!(
            "Searched {batch_count} batch(es) in {:.1?}",
            started.elapsed()
        );
        for outcome in &outcomes {
            if outcome.is_success() {
                log::debug!("{outcome} in {:.1?}", outcome.elapsed);
            } else {
                log::warn!("{outcome}");
            }
        }

        let completed = outcomes.iter().filter(|o| o.is_success()).map(|o| o.index);
        let combined = merge_results(dir, completed)?;
        Ok(SearchReport { combined, outcomes })
    }

    fn run_batch(&self, index: usize, dir: &Path, gate: &LaunchGate) -> BatchOutcome {
        let query = batch_input_path(dir, index);
        let output = batch_output_path(dir, index);
        // A stale file from an earlier run must not pass for this run's output.
        let _ = fs::remove_file(&output);

        gate.wait_turn();
        let started = Instant::now();
        let status = self.execute(&query, &output);
        let status = match status {
            BatchStatus::Completed if !output.exists() => BatchStatus::MissingOutput,
            other => other,
        };
        BatchOutcome {
            index,
            status,
            elapsed: started.elapsed(),
        }
    }

    fn execute(&self, query: &Path, output: &Path) -> BatchStatus {
        let mut cmd = self.tool.command(query, output);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return BatchStatus::ProcessError(format!(
                    "could not start {}: {e}",
                    self.tool.name()
                ))
            }
        };
        let stderr = drain_stderr(&mut child);

        let started = Instant::now();
        let timeout = self.config.timeout();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if timeout.is_some_and(|t| started.elapsed() > t) {
                        let _ = child.kill();
                        let _ = child.wait();
                        return BatchStatus::TimedOut;
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    let _ = child.kill();
                    return BatchStatus::ProcessError(format!("lost track of search process: {e}"));
                }
            }
        };

        if status.success() {
            BatchStatus::Completed
        } else {
            let stderr = stderr
                .and_then(|handle| handle.join().ok())
                .unwrap_or_default();
            BatchStatus::Failed {
                code: status.code(),
                stderr,
            }
        }
    }
}

/// Outcome for a batch whose query file is missing or incomplete.
fn skip_batch(index: usize, dir: &Path) -> BatchOutcome {
    let _ = fs::remove_file(batch_output_path(dir, index));
    BatchOutcome {
        index,
        status: BatchStatus::InputUnavailable,
        elapsed: Duration::ZERO,
    }
}

/// Read the child's stderr on a side thread so a chatty tool cannot fill the
/// pipe and stall.
fn drain_stderr(child: &mut Child) -> Option<JoinHandle<String>> {
    child.stderr.take().map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = String::new();
            let _ = pipe.read_to_string(&mut buf);
            buf
        })
    })
}

/// Concatenate `blastResults{i}.bl` for each index in `batches`, in the order
/// given, into `blastResults.bl`.
///
/// Each file is copied byte for byte; a missing final newline is added so the
/// next batch starts on its own line. Missing or unreadable batch files are
/// logged and contribute nothing. Only a failure to write the combined file is
/// an error.
pub fn merge_results<I>(dir: &Path, batches: I) -> Result<PathBuf>
where
    I: IntoIterator<Item = usize>,
{
    let combined = combined_results_path(dir);
    let merge_err = |source| PipelineError::Merge {
        path: combined.clone(),
        source,
    };

    let file = File::create(&combined).map_err(merge_err)?;
    let mut writer = BufWriter::new(file);

    for index in batches {
        let path = batch_output_path(dir, index);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("Skipping results of batch {index} ({}): {e}", path.display());
                continue;
            }
        };
        writer.write_all(&bytes).map_err(merge_err)?;
        if bytes.last().is_some_and(|&b| b != b'\n') {
            writer.write_all(b"\n").map_err(merge_err)?;
        }
    }
    writer.flush().map_err(merge_err)?;

    log::info!("Combined search results written to {}", combined.display());
    Ok(combined)
}
