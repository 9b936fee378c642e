use std::collections::HashSet;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use log::LevelFilter;
use thiserror::Error;

use crate::cli::Arguments;

// External software
pub const CENTRIFUGE_TAG: &str = "centrifuge";
pub const PARALLEL_TAG: &str = "parallel";
pub const P3_ALL_GENOMES_TAG: &str = "p3-all-genomes";
pub const WGET_TAG: &str = "wget";
pub const SHELL_TAG: &str = "sh";

lazy_static! {
    // Only the prokaryotic indexes: genomes are fetched from PATRIC afterwards, so nt is useless here.
    pub static ref VALID_CENTRIFUGE_INDEXES: HashSet<&'static str> = {
        let mut s = HashSet::new();
        s.insert("p_compressed");
        s.insert("p_compressed+h+v");
        s.insert("p+h+v");
        s
    };
}

// Output layout
pub const SPLIT_DIR: &str = "split";
pub const REPORTS_DIR: &str = "reports";
pub const COLLAPSED_DIR: &str = "collapsed";
pub const JOBS_DIR: &str = "jobs";
pub const FAILED_JOBS_DIR: &str = "failed-jobs";
pub const DEFAULT_OUT_DIR: &str = "centrifuge-out";
pub const GENOMES_SUBDIR: &str = "genomes";
pub const INDEXES_SUBDIR: &str = "centrifuge-indexes";

// Report files
pub const TSV_EXT: &str = "tsv";
pub const SUM_EXT: &str = "sum";
pub const REPORT_COLUMNS: [&str; 7] = [
    "name",
    "taxID",
    "taxRank",
    "genomeSize",
    "numReads",
    "numUniqueReads",
    "abundance",
];

// PATRIC
pub const PATRIC_FTP_ROOT: &str = "ftp://ftp.patricbrc.org/genomes";
pub const MIN_REFSEQ_GFF_LINES: usize = 5;
pub const DOWNLOAD_RETRY_DELAY_MS: u64 = 2_000;

// Static Parameters
pub const DEFAULT_MAX_SEQS: usize = 1_000_000;
pub const DEFAULT_MIN_ABUNDANCE: f64 = 0.01;
pub const WORK_ENV: &str = "WORK";

pub const FASTA_TAG: &str = "fasta";
pub const FASTQ_TAG: &str = "fastq";

pub struct RunConfig {
    pub cwd: PathBuf,
    pub out_dir: PathBuf,
    pub genome_dir: PathBuf,
    pub index_dir: PathBuf,
    /// Path of the running binary; worker jobs call back into it.
    pub exe: PathBuf,
    pub args: Arguments,
    pub log_level: LevelFilter,
}

fn absolutize(path: PathBuf, cwd: &Path) -> PathBuf {
    if path.is_absolute() { path } else { cwd.join(path) }
}

impl RunConfig {
    /// Resolves every directory once. `work_root` is the value of `$WORK`
    /// (TACC sets it; locally it is usually absent and `./` stands in).
    pub fn new(args: Arguments, cwd: PathBuf, work_root: Option<PathBuf>, exe: PathBuf) -> Self {
        let work = absolutize(work_root.unwrap_or_else(|| PathBuf::from("./")), &cwd);
        let out_dir = match &args.out_dir {
            Some(out) => absolutize(PathBuf::from(out), &cwd),
            None => cwd.join(DEFAULT_OUT_DIR),
        };
        let genome_dir = match &args.genome_dir {
            Some(dir) => absolutize(PathBuf::from(dir), &cwd),
            None => work.join(GENOMES_SUBDIR),
        };
        let index_dir = match &args.index_dir {
            Some(dir) => absolutize(PathBuf::from(dir), &cwd),
            None => work.join(INDEXES_SUBDIR),
        };
        let log_level = if args.verbose { LevelFilter::Debug } else { LevelFilter::Info };

        Self { cwd, out_dir, genome_dir, index_dir, exe, args, log_level }
    }

    pub fn split_dir(&self) -> PathBuf {
        self.out_dir.join(SPLIT_DIR)
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.out_dir.join(REPORTS_DIR)
    }

    pub fn collapsed_dir(&self) -> PathBuf {
        self.out_dir.join(COLLAPSED_DIR)
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.out_dir.join(JOBS_DIR)
    }

    pub fn failed_jobs_dir(&self) -> PathBuf {
        self.out_dir.join(FAILED_JOBS_DIR)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("No usable input: {0}")]
    NoInput(String),

    #[error("{tool} failed: {error}")]
    ToolExecution { tool: String, error: String },

    #[error("Batch '{label}' failed with status {status} (failure record: {})", record.display())]
    BatchFailed {
        label: String,
        status: i32,
        record: PathBuf,
    },

    #[error("Malformed report {} line {line}: {reason}", path.display())]
    InvalidReport {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("I/O error: {0}")]
    IOError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
