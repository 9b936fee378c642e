use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Result;
use clap::Parser;
use radcot::config::defs::{PipelineError, RunConfig};
use radcot::pipelines::centrifuge::{job_runner, split_files, split_jobs};
use radcot::utils::collapse::collapse_reports;
use radcot::utils::jobs::JobFileBuilder;
use radcot::utils::report::{select_taxa, ClassificationReport};
use radcot::Arguments;

const HEADER: &str = "name\ttaxID\ttaxRank\tgenomeSize\tnumReads\tnumUniqueReads\tabundance\n";

fn radcot_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_radcot"))
}

fn native_config(out: &Path, extra: &[&str]) -> RunConfig {
    let mut argv = vec!["radcot", "--out", out.to_str().unwrap(), "--executor", "native"];
    argv.extend_from_slice(extra);
    RunConfig::new(Arguments::parse_from(argv), out.to_path_buf(), None, radcot_bin())
}

#[tokio::test]
async fn test_split_through_worker_binary() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("sample.fasta");
    let mut fasta = String::new();
    for i in 1..=5 {
        fasta.push_str(&format!(">read{}\nACGTACGT\n", i));
    }
    fs::write(&input, fasta)?;

    let config = native_config(dir.path(), &["-P", "2", "-X", "2"]);
    let runner = job_runner(&config);
    let chunks = split_files(&config, &runner, &[input.clone()]).await?;

    let names: Vec<String> = chunks
        .iter()
        .map(|c| c.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["sample.1.fasta", "sample.2.fasta", "sample.3.fasta"]);
    assert_eq!(fs::read_to_string(&chunks[2])?, ">read5\nACGTACGT\n");

    // second run finds the chunk directory and schedules nothing
    assert!(split_jobs(&config, &[input.clone()])?.is_empty());
    assert_eq!(split_files(&config, &runner, &[input]).await?, chunks);
    Ok(())
}

#[tokio::test]
async fn test_failed_batch_is_fatal_and_recorded() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = native_config(dir.path(), &["-P", "3"]);
    let runner = job_runner(&config);

    let mut jobs = JobFileBuilder::new();
    jobs.push("true");
    jobs.push("echo no index >&2; exit 2");
    let outcome = runner.run_jobs(&jobs, &config.jobs_dir(), "Running Centrifuge").await?;
    assert_eq!(outcome.status, 2);

    let err = outcome.ensure_success().unwrap_err();
    match err {
        PipelineError::BatchFailed { label, status, record } => {
            assert_eq!(label, "Running Centrifuge");
            assert_eq!(status, 2);
            assert!(record.starts_with(config.failed_jobs_dir()));
            assert!(fs::read_to_string(record)?.contains("no index"));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(fs::read_dir(config.jobs_dir())?.count(), 0);
    Ok(())
}

#[test]
fn test_collapse_then_select() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let reports = dir.path().join("reports");
    fs::create_dir(&reports)?;
    fs::write(
        reports.join("sample.1.fasta.tsv"),
        format!("{}Escherichia coli\t1\tspecies\t4600000\t10\t8\t1.0\n", HEADER),
    )?;
    fs::write(
        reports.join("sample.2.fasta.tsv"),
        format!(
            "{}Escherichia coli\t1\tspecies\t4600000\t5\t4\t0.5\nBacillus subtilis\t2\tspecies\t4200000\t5\t5\t0.5\n",
            HEADER
        ),
    )?;
    let report_files: Vec<PathBuf> = fs::read_dir(&reports)?.map(|e| e.map(|e| e.path())).collect::<Result<_, _>>()?;

    let collapse_dir = collapse_reports(&[PathBuf::from("/data/sample.fasta")], &report_files, &dir.path().join("collapsed"))?;
    let collapsed_path = collapse_dir.join("sample.tsv");
    assert_eq!(
        fs::read_to_string(&collapsed_path)?,
        format!(
            "{}Escherichia coli\t1\tspecies\t4600000\t15\t12\t0.75\nBacillus subtilis\t2\tspecies\t4200000\t5\t5\t0.25\n",
            HEADER
        )
    );

    let collapsed = ClassificationReport::from_path(&collapsed_path)?;
    assert_eq!(select_taxa(&collapsed, 0.25), vec![1]);
    assert_eq!(select_taxa(&collapsed, 0.01), vec![1, 2]);
    Ok(())
}

#[test]
fn test_binary_exits_one_on_bad_module() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let status = Command::new(radcot_bin())
        .args(["--module", "bogus"])
        .current_dir(dir.path())
        .status()?;
    assert_eq!(status.code(), Some(1));

    let status = Command::new(radcot_bin())
        .args(["--module", "centrifuge", "--index", "nt", "-q", "."])
        .current_dir(dir.path())
        .status()?;
    assert_eq!(status.code(), Some(1));
    Ok(())
}
