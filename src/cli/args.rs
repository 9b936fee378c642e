use clap::{Parser, ValueEnum};

use crate::config::defs::{DEFAULT_MAX_SEQS, DEFAULT_MIN_ABUNDANCE, FASTA_TAG, FASTQ_TAG};

#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
pub enum FileFormat {
    #[default]
    Fasta,
    Fastq,
}

impl FileFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileFormat::Fasta => FASTA_TAG,
            FileFormat::Fastq => FASTQ_TAG,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
pub enum AnnotationType {
    #[default]
    Refseq,
    Patric,
}

impl AnnotationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnnotationType::Refseq => "refseq",
            AnnotationType::Patric => "patric",
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
pub enum Executor {
    /// GNU parallel reading the job file on stdin
    #[default]
    Parallel,
    /// In-process tokio executor running each line through `sh -c`
    Native,
}

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "radcot", version, about = "Centrifuge classification, report collapsing and PATRIC genome retrieval")]
pub struct Arguments {

    #[arg(long, default_value = "centrifuge", help = "centrifuge | split | genomes | collapse")]
    pub module: String,

    #[arg(short = 'v', long = "verbose", action)]
    pub verbose: bool,

    #[arg(short = 'q', long = "query", num_args = 1.., help = "File(s) or directory(ies) of input")]
    pub query: Vec<String>,

    #[arg(short = '1', long = "forward", default_value = "", help = "Comma-separated forward reads that pair with reverse reads")]
    pub forward: String,

    #[arg(short = '2', long = "reverse", default_value = "", help = "Comma-separated reverse reads that pair with forward reads")]
    pub reverse: String,

    #[arg(short = 'U', long = "unpaired", default_value = "", help = "Comma-separated unpaired reads")]
    pub unpaired: String,

    #[arg(short = 'f', long = "format", default_value = "fasta", value_enum)]
    pub format: FileFormat,

    #[arg(short = 'i', long = "index", default_value = "p_compressed+h+v")]
    pub index: String,

    #[arg(short = 'I', long = "index-dir", help = "Centrifuge index directory [default: $WORK/centrifuge-indexes]")]
    pub index_dir: Option<String>,

    #[arg(short = 'o', long = "out", help = "Output directory [default: ./centrifuge-out]")]
    pub out_dir: Option<String>,

    #[arg(short = 'g', long = "genome-dir", help = "Directory with all the genomes (*.fna). Must be the same in every step [default: $WORK/genomes]")]
    pub genome_dir: Option<String>,

    #[arg(short = 'x', long = "exclude-taxids", default_value = "")]
    pub exclude_taxids: String,

    #[arg(short = 'X', long = "max-seqs-per-file", default_value_t = DEFAULT_MAX_SEQS)]
    pub max_seqs_per_file: usize,

    #[arg(short = 't', long, default_value_t = 1, help = "Threads per centrifuge instance")]
    pub threads: usize,

    #[arg(short = 'P', long, default_value_t = 1, help = "Max number of concurrent jobs per batch")]
    pub procs: usize,

    #[arg(short = 'm', long = "min-abundance", default_value_t = DEFAULT_MIN_ABUNDANCE, help = "Minimum abundance needed to download a species' genome")]
    pub min_abundance: f64,

    #[arg(short = 'a', long = "annotation-type", default_value = "refseq", value_enum)]
    pub annotation_type: AnnotationType,

    #[arg(long, default_value = "parallel", value_enum)]
    pub executor: Executor,

    #[arg(long, default_value = "parallel", help = "GNU parallel binary used by the parallel executor")]
    pub parallel_bin: String,

    #[arg(long, default_value_t = 2)]
    pub download_retries: usize,

    // Worker-only inputs
    #[arg(long = "file1", help = "Sequence file to split (split module)")]
    pub file1: Option<String>,

    #[arg(short = 'r', long = "report", help = "Collapsed report to fetch genomes for (genomes module)")]
    pub report: Option<String>,
}
