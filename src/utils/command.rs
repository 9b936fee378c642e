/// Functions and structs for building the command lines of external tools

use anyhow::{anyhow, Result};
use log::info;

use crate::config::defs::{CENTRIFUGE_TAG, PARALLEL_TAG};


pub mod centrifuge {
    use std::path::{Path, PathBuf};
    use anyhow::anyhow;
    use tokio::process::Command;
    use crate::cli::FileFormat;
    use crate::config::defs::CENTRIFUGE_TAG;
    use crate::utils::file::{shell_path, shell_quote};
    use crate::utils::streams::read_child_output_to_vec;

    /// One unit of classification work.
    #[derive(Debug, Clone, PartialEq)]
    pub enum ClassifyInput {
        Unpaired(PathBuf),
        Paired { forward: PathBuf, reverse: PathBuf },
    }

    impl ClassifyInput {
        /// File the report names are derived from; the forward read for pairs.
        pub fn naming_file(&self) -> &Path {
            match self {
                ClassifyInput::Unpaired(file) => file,
                ClassifyInput::Paired { forward, .. } => forward,
            }
        }
    }

    #[derive(Debug, Clone)]
    pub struct CentrifugeConfig {
        pub index_dir: PathBuf,
        pub index_name: String,
        pub threads: usize,
        pub format: FileFormat,
        /// Already validated, comma-separated numeric taxIDs; empty for none.
        pub exclude_taxids: String,
    }

    impl CentrifugeConfig {
        pub fn command_line(&self, input: &ClassifyInput, sum_file: &Path, tsv_file: &Path) -> String {
            let mut parts: Vec<String> = vec![
                format!("CENTRIFUGE_INDEXES={}", shell_path(&self.index_dir)),
                CENTRIFUGE_TAG.to_string(),
            ];
            if !self.exclude_taxids.is_empty() {
                parts.push("--exclude-taxids".to_string());
                parts.push(self.exclude_taxids.clone());
            }
            if self.format == FileFormat::Fasta {
                parts.push("-f".to_string());
            }
            parts.push("-p".to_string());
            parts.push(self.threads.to_string());
            parts.push("-x".to_string());
            parts.push(shell_quote(&self.index_name));
            match input {
                ClassifyInput::Unpaired(file) => {
                    parts.push("-U".to_string());
                    parts.push(shell_path(file));
                }
                ClassifyInput::Paired { forward, reverse } => {
                    parts.push("-1".to_string());
                    parts.push(shell_path(forward));
                    parts.push("-2".to_string());
                    parts.push(shell_path(reverse));
                }
            }
            parts.push("-S".to_string());
            parts.push(shell_path(sum_file));
            parts.push("--report-file".to_string());
            parts.push(shell_path(tsv_file));
            parts.join(" ")
        }
    }

    pub async fn centrifuge_presence_check() -> anyhow::Result<String> {
        let mut child = Command::new(CENTRIFUGE_TAG)
            .arg("--version")
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| anyhow!("Failed to spawn: {}. Is centrifuge installed?", e))?;

        let lines = read_child_output_to_vec(&mut child).await?;
        let first_line = lines
            .first()
            .ok_or_else(|| anyhow!("No output from centrifuge --version"))?;
        let version = first_line
            .split_whitespace()
            .last()
            .ok_or_else(|| anyhow!("Invalid centrifuge --version output: {}", first_line))?
            .to_string();
        Ok(version)
    }
}

pub mod parallel {
    use std::collections::HashMap;
    use std::path::Path;
    use anyhow::anyhow;
    use tokio::process::Command;
    use crate::config::defs::PARALLEL_TAG;
    use crate::utils::streams::read_child_output_to_vec;

    /// `--halt now,fail=1` makes parallel exit with the first failing job's status and kill the rest.
    pub fn arg_generator(procs: usize, joblog: &Path) -> Vec<String> {
        vec![
            "--halt".to_string(),
            "now,fail=1".to_string(),
            "-P".to_string(),
            procs.to_string(),
            "--joblog".to_string(),
            joblog.to_string_lossy().into_owned(),
        ]
    }

    #[derive(Debug, Clone, PartialEq)]
    pub struct FailedJob {
        pub command: String,
        pub exit_code: i32,
    }

    /// Finds the job that caused the halt in a `--joblog` table. Jobs killed by
    /// the halt carry a signal; the culprit exited non-zero on its own.
    pub fn first_failed_job(joblog: &str) -> Option<FailedJob> {
        let mut lines = joblog.lines();
        let header: HashMap<&str, usize> = lines
            .next()?
            .split('\t')
            .enumerate()
            .map(|(i, c)| (c.trim(), i))
            .collect();
        let exit_idx = *header.get("Exitval")?;
        let signal_idx = *header.get("Signal")?;
        let command_idx = *header.get("Command")?;

        let mut killed: Option<FailedJob> = None;
        for line in lines {
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() <= command_idx {
                continue;
            }
            let exit_code: i32 = fields[exit_idx].trim().parse().unwrap_or(0);
            let signal: i32 = fields[signal_idx].trim().parse().unwrap_or(0);
            let command = fields[command_idx..].join("\t");
            if exit_code != 0 && signal == 0 {
                return Some(FailedJob { command, exit_code });
            }
            if signal != 0 && killed.is_none() {
                killed = Some(FailedJob { command, exit_code });
            }
        }
        killed
    }

    pub async fn parallel_presence_check(bin: &str) -> anyhow::Result<String> {
        let mut child = Command::new(bin)
            .arg("--version")
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| anyhow!("Failed to spawn {}: {}. Is GNU parallel installed?", PARALLEL_TAG, e))?;

        let lines = read_child_output_to_vec(&mut child).await?;
        let first_line = lines
            .first()
            .ok_or_else(|| anyhow!("No output from parallel --version"))?;
        let version = first_line
            .split_whitespace()
            .nth(2)
            .ok_or_else(|| anyhow!("Invalid parallel --version output: {}", first_line))?
            .to_string();
        Ok(version)
    }
}

pub mod p3 {
    pub fn arg_generator(tax_id: u64) -> Vec<String> {
        vec![
            "-e".to_string(),
            format!("taxon_id,{}", tax_id),
            "-e".to_string(),
            "genome_status,Complete".to_string(),
        ]
    }

    /// Genome IDs from `p3-all-genomes` output, minus the `genome.genome_id` header.
    pub fn parse_genome_ids(stdout: &str) -> Vec<String> {
        stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.contains("genome"))
            .map(String::from)
            .collect()
    }
}

pub mod wget {
    use std::path::Path;

    /// Quiet download into `dir`, never clobbering a file that is already there.
    pub fn arg_generator(url: &str, dir: &Path) -> Vec<String> {
        vec![
            "-q".to_string(),
            "-nc".to_string(),
            "-P".to_string(),
            dir.to_string_lossy().into_owned(),
            url.to_string(),
        ]
    }
}

pub async fn check_version(tool: &str, parallel_bin: &str) -> Result<String> {
    match tool {
        CENTRIFUGE_TAG => centrifuge::centrifuge_presence_check().await,
        PARALLEL_TAG => parallel::parallel_presence_check(parallel_bin).await,
        _ => Err(anyhow!("Unknown tool: {}", tool)),
    }
}

pub async fn check_versions(tools: Vec<&str>, parallel_bin: &str) -> Result<()> {
    for tool in tools {
        let version = check_version(tool, parallel_bin).await?;
        info!("{} version: {}", tool, version);
    }
    Ok(())
}
