use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::process::Command;
use tokio::time::{sleep, Duration};

use crate::cli::AnnotationType;
use crate::config::defs::{
    PipelineError, RunConfig, DOWNLOAD_RETRY_DELAY_MS, MIN_REFSEQ_GFF_LINES, P3_ALL_GENOMES_TAG, PATRIC_FTP_ROOT,
    TSV_EXT, WGET_TAG,
};
use crate::utils::command::{p3, wget};
use crate::utils::file::{count_lines, list_files};
use crate::utils::report::{select_taxa, ClassificationReport};

// wget: the server answered with an error (404 and friends); retrying will not help.
const WGET_SERVER_ERROR: i32 = 8;

pub fn genome_url(genome_id: &str, file_name: &str) -> String {
    format!("{}/{}/{}", PATRIC_FTP_ROOT, genome_id, file_name)
}

/// `--report` may name one report or a directory of `.tsv` reports.
pub fn report_files(report: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    if report.is_file() {
        return Ok(vec![report.to_path_buf()]);
    }
    if !report.is_dir() {
        return Err(PipelineError::InvalidConfig(format!(
            "--report \"{}\" does not seem to be a file or a directory",
            report.display()
        )));
    }
    let files: Vec<PathBuf> = list_files(report)
        .map_err(|e| PipelineError::IOError(format!("{}: {}", report.display(), e)))?
        .into_iter()
        .filter(|p| p.extension().is_some_and(|ext| ext == TSV_EXT))
        .collect();
    if files.is_empty() {
        return Err(PipelineError::NoInput(format!("Found no reports in --report {}", report.display())));
    }
    Ok(files)
}

/// Complete PATRIC genomes filed under `tax_id`. A broken PATRIC CLI is fatal.
async fn complete_genomes(tax_id: u64) -> Result<Vec<String>, PipelineError> {
    let output = Command::new(P3_ALL_GENOMES_TAG)
        .args(p3::arg_generator(tax_id))
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| PipelineError::ToolExecution {
            tool: P3_ALL_GENOMES_TAG.to_string(),
            error: format!("Failed to spawn: {}. Can not do much without the PATRIC CLI", e),
        })?;

    if !output.status.success() {
        return Err(PipelineError::ToolExecution {
            tool: P3_ALL_GENOMES_TAG.to_string(),
            error: format!(
                "taxon {} exited with {}: {}",
                tax_id,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(p3::parse_genome_ids(&String::from_utf8_lossy(&output.stdout)))
}

/// Fetches `file_name` of a genome into `dir` unless it is already there.
/// Transient failures are retried `retries` times with a linear back-off.
async fn download(genome_id: &str, file_name: &str, dir: &Path, retries: usize) -> bool {
    let target = dir.join(file_name);
    if target.is_file() {
        debug!("\"{}\" exists, skipping", target.display());
        return true;
    }
    let url = genome_url(genome_id, file_name);

    for attempt in 0..=retries {
        if attempt > 0 {
            sleep(Duration::from_millis(DOWNLOAD_RETRY_DELAY_MS * attempt as u64)).await;
        }
        let status = Command::new(WGET_TAG)
            .args(wget::arg_generator(&url, dir))
            .stdin(Stdio::null())
            .status()
            .await;
        match status {
            Ok(status) if status.success() && target.is_file() => return true,
            Ok(status) => {
                let _ = fs::remove_file(&target);
                warn!("{} {} failed ({}), attempt {}/{}", WGET_TAG, url, status, attempt + 1, retries + 1);
                if status.code() == Some(WGET_SERVER_ERROR) {
                    return false;
                }
            }
            Err(e) => {
                warn!("Failed to spawn {}: {}", WGET_TAG, e);
                return false;
            }
        }
    }
    false
}

/// RefSeq annotation with the PATRIC one as the fallback, or PATRIC directly.
async fn fetch_annotation(genome_id: &str, dir: &Path, annotation: AnnotationType, retries: usize) {
    let patric_gff = format!("{}.PATRIC.gff", genome_id);
    if annotation == AnnotationType::Patric {
        if !download(genome_id, &patric_gff, dir, retries).await {
            warn!("Could not get {}", patric_gff);
        }
        return;
    }

    let refseq_gff = format!("{}.RefSeq.gff", genome_id);
    let refseq_path = dir.join(&refseq_gff);
    download(genome_id, &refseq_gff, dir, retries).await;

    let usable = match count_lines(&refseq_path) {
        Ok(lines) if lines >= MIN_REFSEQ_GFF_LINES => true,
        Ok(lines) => {
            info!("{} has {} lines, it is probably bogus. Trying {}", refseq_gff, lines, patric_gff);
            false
        }
        Err(_) => {
            info!("No {}, trying {}", refseq_gff, patric_gff);
            false
        }
    };
    if usable {
        return;
    }

    if download(genome_id, &patric_gff, dir, retries).await {
        if refseq_path.exists() {
            if let Err(e) = fs::remove_file(&refseq_path) {
                warn!("Could not remove {}: {}", refseq_path.display(), e);
            }
        }
    } else {
        warn!("Could not get {} either", patric_gff);
    }
}

/// Sequence plus annotation of one PATRIC genome. Download failures are warnings.
pub async fn fetch_genome(genome_id: &str, dir: &Path, annotation: AnnotationType, retries: usize) {
    info!("Getting PATRIC genome_id {}", genome_id);
    let fna = format!("{}.fna", genome_id);
    if !download(genome_id, &fna, dir, retries).await {
        warn!("Could not get {}", fna);
    }
    fetch_annotation(genome_id, dir, annotation, retries).await;
}

/// Genome worker: every taxon above `--min-abundance` in `--report` gets its
/// complete PATRIC genomes and annotations in the genome directory.
pub async fn run(config: Arc<RunConfig>) -> Result<(), PipelineError> {
    let args = &config.args;
    let report = args
        .report
        .as_ref()
        .map(|r| config.cwd.join(r))
        .ok_or_else(|| PipelineError::InvalidConfig("--report is required for the genomes module".to_string()))?;

    fs::create_dir_all(&config.genome_dir)
        .map_err(|e| PipelineError::IOError(format!("{}: {}", config.genome_dir.display(), e)))?;

    for report_file in report_files(&report)? {
        let taxa = select_taxa(&ClassificationReport::from_path(&report_file)?, args.min_abundance);
        info!(
            "{}: {} taxa above abundance {}: {:?}",
            report_file.display(),
            taxa.len(),
            args.min_abundance,
            taxa
        );

        for tax_id in taxa {
            let genome_ids = complete_genomes(tax_id).await?;
            if genome_ids.is_empty() {
                warn!("No complete PATRIC genomes for taxID {}", tax_id);
            }
            for genome_id in genome_ids {
                fetch_genome(&genome_id, &config.genome_dir, args.annotation_type, args.download_retries).await;
            }
        }
    }
    Ok(())
}
