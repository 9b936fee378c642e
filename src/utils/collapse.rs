//! Collapsing of per-chunk centrifuge reports back into one report per input file.
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};
use regex::Regex;

use crate::config::defs::{PipelineError, SUM_EXT, TSV_EXT};
use crate::utils::file::{collapsed_path, split_extension};
use crate::utils::report::{round2, write_header, write_row, ClassificationReport, TaxonRow};

/// Chunk artifacts belonging to one original input, ordered by chunk ordinal.
#[derive(Debug, Default, PartialEq)]
pub struct ChunkReports {
    pub tsv: Vec<PathBuf>,
    pub sum: Vec<PathBuf>,
}

/// Matcher for `<stem>.<ordinal>.<ext>.(tsv|sum)` built from an original input file name.
pub fn chunk_report_regex(input_name: &str) -> Result<Regex, regex::Error> {
    let (stem, ext) = split_extension(input_name);
    let ext = ext.trim_start_matches('.');
    let pattern = if ext.is_empty() {
        format!(r"^{}\.(\d+)\.({}|{})$", regex::escape(stem), TSV_EXT, SUM_EXT)
    } else {
        format!(
            r"^{}\.(\d+)\.{}\.({}|{})$",
            regex::escape(stem),
            regex::escape(ext),
            TSV_EXT,
            SUM_EXT
        )
    };
    Regex::new(&pattern)
}

/// Picks the artifacts of `input_name` out of `reports`, sorted by numeric ordinal.
pub fn match_chunk_reports(input_name: &str, reports: &[PathBuf]) -> Result<ChunkReports, PipelineError> {
    let re = chunk_report_regex(input_name)
        .map_err(|e| PipelineError::Other(anyhow::anyhow!("Bad report pattern for {}: {}", input_name, e)))?;

    let mut tsv: Vec<(u64, PathBuf)> = Vec::new();
    let mut sum: Vec<(u64, PathBuf)> = Vec::new();
    for report in reports {
        let Some(name) = report.file_name().map(|n| n.to_string_lossy()) else {
            continue;
        };
        if let Some(caps) = re.captures(&name) {
            let Ok(ordinal) = caps[1].parse::<u64>() else {
                continue;
            };
            match &caps[2] {
                TSV_EXT => tsv.push((ordinal, report.clone())),
                _ => sum.push((ordinal, report.clone())),
            }
        }
    }
    tsv.sort_by_key(|(n, _)| *n);
    sum.sort_by_key(|(n, _)| *n);

    Ok(ChunkReports {
        tsv: tsv.into_iter().map(|(_, p)| p).collect(),
        sum: sum.into_iter().map(|(_, p)| p).collect(),
    })
}

/// Per-taxon aggregate of all chunk reports of one input.
#[derive(Debug, Default, PartialEq)]
pub struct CollapsedReport {
    pub taxa: BTreeMap<u64, TaxonRow>,
}

impl CollapsedReport {
    /// Adds one chunk report. The first chunk seen for a taxon provides its
    /// name, rank and genome size; read counts are summed.
    pub fn add_chunk(&mut self, chunk: &ClassificationReport, source: &Path) {
        for row in &chunk.rows {
            match self.taxa.get_mut(&row.tax_id) {
                None => {
                    self.taxa.insert(row.tax_id, row.clone());
                }
                Some(entry) => {
                    // TODO: confirm with centrifuge whether name/rank/size can legitimately differ between chunks
                    if entry.name != row.name
                        || entry.tax_rank != row.tax_rank
                        || entry.genome_size != row.genome_size
                    {
                        warn!(
                            "taxID {} differs in {}: ({}, {}, {}) vs first seen ({}, {}, {}); keeping the first",
                            row.tax_id,
                            source.display(),
                            row.name,
                            row.tax_rank,
                            row.genome_size,
                            entry.name,
                            entry.tax_rank,
                            entry.genome_size
                        );
                    }
                    entry.num_reads += row.num_reads;
                    entry.num_unique_reads += row.num_unique_reads;
                }
            }
        }
    }

    pub fn total_reads(&self) -> u64 {
        self.taxa.values().map(|t| t.num_reads).sum()
    }

    /// Sets every abundance to round(numReads / total_reads, 2).
    pub fn recompute_abundance(&mut self) {
        let total = self.total_reads();
        if total == 0 {
            warn!("Collapsed report has no classified reads; abundances set to 0");
        }
        for taxon in self.taxa.values_mut() {
            taxon.abundance = if total == 0 {
                0.0
            } else {
                round2(taxon.num_reads as f64 / total as f64)
            };
        }
    }

    /// Writes the table ordered by taxID.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        write_header(writer)?;
        for taxon in self.taxa.values() {
            write_row(writer, taxon)?;
        }
        Ok(())
    }
}

/// Merges chunk TSV reports, in the given order, into one collapsed report.
pub fn merge_tsv_reports(files: &[PathBuf]) -> Result<CollapsedReport, PipelineError> {
    let mut collapsed = CollapsedReport::default();
    for (i, file) in files.iter().enumerate() {
        info!("    {:4}: {}", i + 1, file.display());
        let chunk = ClassificationReport::from_path(file)?;
        collapsed.add_chunk(&chunk, file);
    }
    collapsed.recompute_abundance();
    Ok(collapsed)
}

/// Concatenates chunk summary files, keeping only the first file's header line.
pub fn merge_sum_reports<W: Write>(files: &[PathBuf], writer: &mut W) -> Result<(), PipelineError> {
    let io_err = |e: std::io::Error| PipelineError::IOError(e.to_string());
    for (i, file) in files.iter().enumerate() {
        info!("    {:4}: {}", i + 1, file.display());
        let reader = BufReader::new(File::open(file).map_err(io_err)?);
        for (n, line) in reader.lines().enumerate() {
            let line = line.map_err(io_err)?;
            if n == 0 && i > 0 {
                continue;
            }
            writeln!(writer, "{}", line).map_err(io_err)?;
        }
    }
    Ok(())
}

fn write_output<F>(out_path: &Path, write: F) -> Result<(), PipelineError>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<(), PipelineError>,
{
    let file = File::create(out_path).map_err(|e| PipelineError::IOError(format!("{}: {}", out_path.display(), e)))?;
    let mut writer = BufWriter::new(file);
    write(&mut writer)?;
    writer.flush().map_err(|e| PipelineError::IOError(e.to_string()))
}

/// Collapses the chunk reports of every input into `<collapse_dir>/<stem>.(tsv|sum)`.
/// Existing outputs are left alone; an input with no chunks of a type gets a warning.
pub fn collapse_reports(
    input_files: &[PathBuf],
    reports: &[PathBuf],
    collapse_dir: &Path,
) -> Result<PathBuf, PipelineError> {
    fs::create_dir_all(collapse_dir).map_err(|e| PipelineError::IOError(e.to_string()))?;

    for (i, input) in input_files.iter().enumerate() {
        let input_name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| PipelineError::InvalidConfig(format!("Input has no file name: {}", input.display())))?;
        info!("{:4}: {}", i + 1, input_name);

        let chunks = match_chunk_reports(&input_name, reports)?;
        let (stem, _) = split_extension(&input_name);

        for (file_type, files) in [(TSV_EXT, &chunks.tsv), (SUM_EXT, &chunks.sum)] {
            if files.is_empty() {
                warn!("No files ending with \"{}\" for \"{}\"", file_type, stem);
                continue;
            }
            let out_path = collapsed_path(collapse_dir, &input_name, file_type);
            if out_path.is_file() {
                info!("      \"{}\" exists, skipping", out_path.display());
                continue;
            }
            info!("      Writing to \"{}\"", out_path.display());
            if file_type == TSV_EXT {
                let collapsed = merge_tsv_reports(files)?;
                write_output(&out_path, |w| {
                    collapsed.write_to(w).map_err(|e| PipelineError::IOError(e.to_string()))
                })?;
            } else {
                write_output(&out_path, |w| merge_sum_reports(files, w))?;
            }
        }
    }

    Ok(collapse_dir.to_path_buf())
}
