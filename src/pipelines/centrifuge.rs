use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::cli::{Arguments, Executor};
use crate::config::defs::{PipelineError, RunConfig, CENTRIFUGE_TAG, PARALLEL_TAG, TSV_EXT, VALID_CENTRIFUGE_INDEXES};
use crate::utils::collapse::collapse_reports;
use crate::utils::command::centrifuge::{CentrifugeConfig, ClassifyInput};
use crate::utils::command::check_versions;
use crate::utils::file::{find_input_files, list_files, report_paths, shell_path, split_chunk_dir};
use crate::utils::jobs::{JobFileBuilder, JobRunner};
use crate::utils::system::warn_if_oversubscribed;

/// Inputs of one run, after the query / unpaired / paired options are reconciled.
#[derive(Debug, Clone, PartialEq)]
pub enum RunInputs {
    /// Split, classified chunk by chunk, then collapsed back per file.
    Unpaired(Vec<PathBuf>),
    /// Classified whole; reports are keyed on the forward file.
    Paired(Vec<(PathBuf, PathBuf)>),
}

fn io_error(path: &Path, e: std::io::Error) -> PipelineError {
    PipelineError::IOError(format!("{}: {}", path.display(), e))
}

fn create_dir(dir: &Path) -> Result<(), PipelineError> {
    fs::create_dir_all(dir).map_err(|e| io_error(dir, e))
}

fn absolutize(cwd: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() { path } else { cwd.join(path) }
}

fn comma_list(cwd: &Path, list: &str) -> Vec<PathBuf> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| absolutize(cwd, PathBuf::from(s)))
        .collect()
}

fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}

/// Splits a comma-separated taxID list into (numeric, rejected) entries.
pub fn partition_taxids(raw: &str) -> (Vec<&str>, Vec<&str>) {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .partition(|t| t.chars().all(|c| c.is_ascii_digit()))
}

/// Keeps the numeric entries of a comma-separated taxID list.
/// Anything else is dropped with a warning.
pub fn normalize_excluded_taxids(raw: &str) -> String {
    let (good, rejected) = partition_taxids(raw);
    for tax_id in rejected {
        warn!("\"{}\" is not numeric", tax_id);
    }
    good.join(",")
}

pub fn validate_index(index_dir: &Path, index_name: &str) -> Result<(), PipelineError> {
    if !VALID_CENTRIFUGE_INDEXES.contains(index_name) {
        let mut valid: Vec<&str> = VALID_CENTRIFUGE_INDEXES.iter().copied().collect();
        valid.sort();
        return Err(PipelineError::InvalidConfig(format!(
            "--index \"{}\" is not valid, please choose from: {}",
            index_name,
            valid.join(", ")
        )));
    }
    if !index_dir.is_dir() {
        return Err(PipelineError::InvalidConfig(format!(
            "--index-dir \"{}\" is not a directory",
            index_dir.display()
        )));
    }
    Ok(())
}

fn has_unpaired_inputs(args: &Arguments) -> bool {
    !args.query.is_empty() || !args.unpaired.trim().is_empty()
}

/// Files named by `--query` (files or directories) or `--unpaired` (comma-separated).
fn unpaired_inputs(args: &Arguments, cwd: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let has_query = !args.query.is_empty();
    if has_query && !args.unpaired.trim().is_empty() {
        return Err(PipelineError::InvalidConfig(
            "Using query input AND unpaired is unsupported. Please choose one or the other".to_string(),
        ));
    }
    let files = if has_query {
        find_input_files(&args.query)
            .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?
            .into_iter()
            .map(|f| absolutize(cwd, f))
            .collect::<Vec<_>>()
    } else {
        let files = comma_list(cwd, &args.unpaired);
        if let Some(missing) = files.iter().find(|f| !f.is_file()) {
            return Err(PipelineError::InvalidConfig(format!(
                "--unpaired \"{}\" is not a file",
                missing.display()
            )));
        }
        files
    };

    warn!("Found {} input file{}", files.len(), plural(files.len()));
    if files.is_empty() {
        return Err(PipelineError::NoInput("No usable files from --query".to_string()));
    }
    Ok(files)
}

/// Reconciles `--query`, `--unpaired` and `--forward`/`--reverse`.
///
/// # Arguments
///
/// * `args` - Parsed command line.
/// * `cwd` - Relative paths are resolved against it.
///
/// # Returns
/// RunInputs, or a configuration error when the options conflict or name nothing.
pub fn resolve_inputs(args: &Arguments, cwd: &Path) -> Result<RunInputs, PipelineError> {
    if has_unpaired_inputs(args) {
        return Ok(RunInputs::Unpaired(unpaired_inputs(args, cwd)?));
    }

    let forward = comma_list(cwd, &args.forward);
    let reverse = comma_list(cwd, &args.reverse);
    if !forward.is_empty() && !reverse.is_empty() {
        if forward.len() != reverse.len() {
            return Err(PipelineError::InvalidConfig(format!(
                "Number of forward reads ({}) is not the same as reverse reads ({})",
                forward.len(),
                reverse.len()
            )));
        }
        warn!("Found {} paired read{}", forward.len(), plural(forward.len()));
        return Ok(RunInputs::Paired(forward.into_iter().zip(reverse).collect()));
    }

    Err(PipelineError::NoInput(format!(
        "Need a query or paired forward and reverse reads (query {:?}, forward \"{}\", reverse \"{}\", unpaired \"{}\")",
        args.query, args.forward, args.reverse, args.unpaired
    )))
}

/// Command prefix that calls back into this binary for one worker module.
fn worker_command(config: &RunConfig, module: &str) -> String {
    let mut cmd = format!("{} --module {}", shell_path(&config.exe), module);
    if config.args.verbose {
        cmd.push_str(" --verbose");
    }
    cmd
}

pub fn job_runner(config: &RunConfig) -> JobRunner {
    JobRunner::new(
        config.args.executor,
        config.args.procs,
        config.args.parallel_bin.clone(),
        config.failed_jobs_dir(),
    )
}

pub fn centrifuge_config(config: &RunConfig) -> CentrifugeConfig {
    CentrifugeConfig {
        index_dir: config.index_dir.clone(),
        index_name: config.args.index.clone(),
        threads: config.args.threads.max(1),
        format: config.args.format,
        exclude_taxids: normalize_excluded_taxids(&config.args.exclude_taxids),
    }
}

/// One split job per input whose chunk directory does not exist yet.
pub fn split_jobs(config: &RunConfig, inputs: &[PathBuf]) -> Result<JobFileBuilder, PipelineError> {
    let split_dir = config.split_dir();
    let mut jobs = JobFileBuilder::new();
    for input in inputs {
        let chunk_dir = split_chunk_dir(&split_dir, input)?;
        if chunk_dir.is_dir() {
            warn!("\"{}\" already split, skipping", chunk_dir.display());
            continue;
        }
        jobs.push(format!(
            "{} --file1 {} --format {} --out {} --max-seqs-per-file {}",
            worker_command(config, "split"),
            shell_path(input),
            config.args.format.as_str(),
            shell_path(&chunk_dir),
            config.args.max_seqs_per_file
        ));
    }
    Ok(jobs)
}

/// Splits every input and returns the chunks found for them, split now or earlier.
pub async fn split_files(config: &RunConfig, runner: &JobRunner, inputs: &[PathBuf]) -> Result<Vec<PathBuf>, PipelineError> {
    let split_dir = config.split_dir();
    create_dir(&split_dir)?;

    let jobs = split_jobs(config, inputs)?;
    runner.run_jobs(&jobs, &config.jobs_dir(), "Splitting input files").await?.ensure_success()?;

    let mut chunks = Vec::new();
    for input in inputs {
        let chunk_dir = split_chunk_dir(&split_dir, input)?;
        if !chunk_dir.is_dir() {
            warn!("No chunks for \"{}\"", input.display());
            continue;
        }
        let found = list_files(&chunk_dir).map_err(|e| io_error(&chunk_dir, e))?;
        debug!("{}: {} chunk(s)", input.display(), found.len());
        chunks.extend(found);
    }
    Ok(chunks)
}

/// One centrifuge command per unit whose report is not there yet.
pub fn classify_jobs(
    centrifuge: &CentrifugeConfig,
    units: &[ClassifyInput],
    reports_dir: &Path,
) -> Result<JobFileBuilder, PipelineError> {
    let mut jobs = JobFileBuilder::new();
    for unit in units {
        let (sum_file, tsv_file) = report_paths(reports_dir, unit.naming_file())?;
        if tsv_file.is_file() {
            debug!("\"{}\" exists, skipping", tsv_file.display());
            continue;
        }
        jobs.push(centrifuge.command_line(unit, &sum_file, &tsv_file));
    }
    Ok(jobs)
}

/// Classifies every unit and returns every file in the reports directory.
pub async fn run_centrifuge(
    config: &RunConfig,
    runner: &JobRunner,
    centrifuge: &CentrifugeConfig,
    units: &[ClassifyInput],
) -> Result<Vec<PathBuf>, PipelineError> {
    let reports_dir = config.reports_dir();
    create_dir(&reports_dir)?;

    let jobs = classify_jobs(centrifuge, units, &reports_dir)?;
    runner.run_jobs(&jobs, &config.jobs_dir(), "Running Centrifuge").await?.ensure_success()?;

    list_files(&reports_dir).map_err(|e| io_error(&reports_dir, e))
}

/// One genome-fetch job per `.tsv` report in `reports_dir`.
pub fn genome_jobs(config: &RunConfig, reports_dir: &Path) -> Result<JobFileBuilder, PipelineError> {
    let reports: Vec<PathBuf> = list_files(reports_dir)
        .map_err(|e| io_error(reports_dir, e))?
        .into_iter()
        .filter(|p| p.extension().is_some_and(|ext| ext == TSV_EXT))
        .collect();
    if reports.is_empty() {
        warn!("No .{} reports in \"{}\"", TSV_EXT, reports_dir.display());
    }

    let args = &config.args;
    let mut jobs = JobFileBuilder::new();
    for report in &reports {
        jobs.push(format!(
            "{} --report {} --genome-dir {} --min-abundance {} --annotation-type {} --download-retries {}",
            worker_command(config, "genomes"),
            shell_path(report),
            shell_path(&config.genome_dir),
            args.min_abundance,
            args.annotation_type.as_str(),
            args.download_retries
        ));
    }
    Ok(jobs)
}

pub async fn get_genomes(config: &RunConfig, runner: &JobRunner, reports_dir: &Path) -> Result<(), PipelineError> {
    create_dir(&config.genome_dir)?;
    let jobs = genome_jobs(config, reports_dir)?;
    runner.run_jobs(&jobs, &config.jobs_dir(), "Getting genomes").await?.ensure_success()?;
    Ok(())
}

/// Split -> classify -> collapse -> fetch genomes.
pub async fn run(config: Arc<RunConfig>) -> Result<(), PipelineError> {
    let args = &config.args;

    validate_index(&config.index_dir, &args.index)?;
    let inputs = resolve_inputs(args, &config.cwd)?;

    let mut tools = vec![CENTRIFUGE_TAG];
    if args.executor == Executor::Parallel {
        tools.push(PARALLEL_TAG);
    }
    check_versions(tools, &args.parallel_bin)
        .await
        .map_err(|e| PipelineError::ToolExecution { tool: "version check".to_string(), error: e.to_string() })?;
    warn_if_oversubscribed(args.threads, args.procs);

    create_dir(&config.out_dir)?;
    info!("Output directory: {}", config.out_dir.display());

    let runner = job_runner(&config);
    let centrifuge = centrifuge_config(&config);

    let genome_source = match inputs {
        RunInputs::Unpaired(files) => {
            let chunks = split_files(&config, &runner, &files).await?;
            let units: Vec<ClassifyInput> = chunks.into_iter().map(ClassifyInput::Unpaired).collect();
            let reports = run_centrifuge(&config, &runner, &centrifuge, &units).await?;
            let collapse_dir = collapse_reports(&files, &reports, &config.collapsed_dir())?;
            info!("Done, reports in \"{}\"", collapse_dir.display());
            collapse_dir
        }
        RunInputs::Paired(pairs) => {
            let units: Vec<ClassifyInput> = pairs
                .into_iter()
                .map(|(forward, reverse)| ClassifyInput::Paired { forward, reverse })
                .collect();
            run_centrifuge(&config, &runner, &centrifuge, &units).await?;
            let reports_dir = config.reports_dir();
            warn!("Reports dir: {}", reports_dir.display());
            reports_dir
        }
    };

    get_genomes(&config, &runner, &genome_source).await
}

/// Inputs named by the split directory: one subdirectory per original file.
fn split_inputs(split_dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let mut inputs = Vec::new();
    let entries = fs::read_dir(split_dir).map_err(|e| io_error(split_dir, e))?;
    for entry in entries {
        let path = entry.map_err(|e| io_error(split_dir, e))?.path();
        if path.is_dir() {
            inputs.push(path);
        }
    }
    inputs.sort();
    Ok(inputs)
}

/// Re-runs only the collapsing over an existing output directory.
/// Inputs come from `--query`/`--unpaired` when given, else from the split directory.
pub async fn collapse_run(config: Arc<RunConfig>) -> Result<(), PipelineError> {
    let args = &config.args;
    let inputs = if has_unpaired_inputs(args) {
        unpaired_inputs(args, &config.cwd)?
    } else {
        let split_dir = config.split_dir();
        if !split_dir.is_dir() {
            return Err(PipelineError::NoInput(format!(
                "No --query given and no split directory at \"{}\"",
                split_dir.display()
            )));
        }
        split_inputs(&split_dir)?
    };
    if inputs.is_empty() {
        return Err(PipelineError::NoInput("Nothing to collapse".to_string()));
    }

    let reports_dir = config.reports_dir();
    let reports = list_files(&reports_dir).map_err(|e| io_error(&reports_dir, e))?;
    let collapse_dir = collapse_reports(&inputs, &reports, &config.collapsed_dir())?;
    info!("Done, reports in \"{}\"", collapse_dir.display());
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use crate::cli::FileFormat;

    fn run_config(out: &Path, extra: &[&str]) -> RunConfig {
        let mut argv = vec!["radcot", "--out", out.to_str().unwrap()];
        argv.extend_from_slice(extra);
        RunConfig::new(
            Arguments::parse_from(argv),
            out.to_path_buf(),
            Some(out.join("work")),
            PathBuf::from("/opt/radcot/bin/radcot"),
        )
    }

    #[test]
    fn test_normalize_excluded_taxids() {
        assert_eq!(partition_taxids("562,abc,9606"), (vec!["562", "9606"], vec!["abc"]));
        assert_eq!(partition_taxids("562,-1,9606x"), (vec!["562"], vec!["-1", "9606x"]));
        assert_eq!(normalize_excluded_taxids("562,abc,9606"), "562,9606");
        assert_eq!(normalize_excluded_taxids(""), "");
        assert_eq!(normalize_excluded_taxids(" 562 , ,12a"), "562");
    }

    #[test]
    fn test_validate_index() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(validate_index(dir.path(), "p_compressed+h+v").is_ok());
        assert!(validate_index(dir.path(), "p+h+v").is_ok());
        assert!(matches!(validate_index(dir.path(), "nt"), Err(PipelineError::InvalidConfig(_))));
        assert!(matches!(
            validate_index(&dir.path().join("missing"), "p_compressed"),
            Err(PipelineError::InvalidConfig(_))
        ));
        Ok(())
    }

    #[test]
    fn test_resolve_inputs() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let a = dir.path().join("a.fa");
        let b = dir.path().join("b.fa");
        fs::write(&a, ">1\nACGT\n")?;
        fs::write(&b, ">1\nACGT\n")?;
        let cwd = dir.path();

        let args = Arguments::parse_from(["radcot", "-q", cwd.to_str().unwrap()]);
        assert_eq!(resolve_inputs(&args, cwd)?, RunInputs::Unpaired(vec![a.clone(), b.clone()]));

        let args = Arguments::parse_from(["radcot", "-U", "a.fa,b.fa"]);
        assert_eq!(resolve_inputs(&args, cwd)?, RunInputs::Unpaired(vec![a.clone(), b.clone()]));

        let args = Arguments::parse_from(["radcot", "-q", "a.fa", "-U", "b.fa"]);
        assert!(matches!(resolve_inputs(&args, cwd), Err(PipelineError::InvalidConfig(_))));

        let args = Arguments::parse_from(["radcot", "-1", "a_R1.fq,b_R1.fq", "-2", "a_R2.fq"]);
        assert!(matches!(resolve_inputs(&args, cwd), Err(PipelineError::InvalidConfig(_))));

        let args = Arguments::parse_from(["radcot", "-1", "a_R1.fq", "-2", "a_R2.fq"]);
        assert_eq!(
            resolve_inputs(&args, cwd)?,
            RunInputs::Paired(vec![(cwd.join("a_R1.fq"), cwd.join("a_R2.fq"))])
        );

        let args = Arguments::parse_from(["radcot", "-1", "a_R1.fq"]);
        assert!(matches!(resolve_inputs(&args, cwd), Err(PipelineError::NoInput(_))));

        let empty = dir.path().join("empty");
        fs::create_dir(&empty)?;
        let args = Arguments::parse_from(["radcot", "-q", empty.to_str().unwrap()]);
        assert!(matches!(resolve_inputs(&args, cwd), Err(PipelineError::NoInput(_))));
        Ok(())
    }

    #[test]
    fn test_split_jobs_skip_existing_chunk_dirs() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = run_config(dir.path(), &["-f", "fastq", "-X", "500"]);
        let inputs = vec![PathBuf::from("/data/s1.fq"), PathBuf::from("/data/s2.fq")];

        let jobs = split_jobs(&config, &inputs)?;
        assert_eq!(jobs.len(), 2);
        assert_eq!(
            jobs.commands()[0],
            format!(
                "/opt/radcot/bin/radcot --module split --file1 /data/s1.fq --format fastq --out {} --max-seqs-per-file 500",
                dir.path().join("split").join("s1.fq").display()
            )
        );

        fs::create_dir_all(dir.path().join("split").join("s1.fq"))?;
        let jobs = split_jobs(&config, &inputs)?;
        assert_eq!(jobs.len(), 1);
        assert!(jobs.commands()[0].contains("--file1 /data/s2.fq"));

        fs::create_dir_all(dir.path().join("split").join("s2.fq"))?;
        assert!(split_jobs(&config, &inputs)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_classify_jobs_skip_existing_reports() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let reports = dir.path().join("reports");
        fs::create_dir(&reports)?;
        let centrifuge = CentrifugeConfig {
            index_dir: PathBuf::from("/idx"),
            index_name: "p_compressed".to_string(),
            threads: 2,
            format: FileFormat::Fasta,
            exclude_taxids: String::new(),
        };
        let units = vec![
            ClassifyInput::Unpaired(PathBuf::from("/o/split/s.fa/s.1.fa")),
            ClassifyInput::Unpaired(PathBuf::from("/o/split/s.fa/s.2.fa")),
        ];

        let jobs = classify_jobs(&centrifuge, &units, &reports)?;
        assert_eq!(jobs.len(), 2);
        assert!(jobs.commands()[1].contains(&format!("--report-file {}", reports.join("s.2.fa.tsv").display())));

        fs::write(reports.join("s.1.fa.tsv"), "")?;
        let jobs = classify_jobs(&centrifuge, &units, &reports)?;
        assert_eq!(jobs.len(), 1);
        assert!(jobs.commands()[0].contains("-U /o/split/s.fa/s.2.fa"));
        Ok(())
    }

    #[test]
    fn test_genome_jobs_one_per_tsv() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = run_config(dir.path(), &["-m", "0.05", "-a", "patric", "-v"]);
        let collapsed = dir.path().join("collapsed");
        fs::create_dir(&collapsed)?;
        for name in ["b.tsv", "a.tsv", "a.sum"] {
            fs::write(collapsed.join(name), "")?;
        }

        let jobs = genome_jobs(&config, &collapsed)?;
        assert_eq!(jobs.len(), 2);
        assert_eq!(
            jobs.commands()[0],
            format!(
                "/opt/radcot/bin/radcot --module genomes --verbose --report {} --genome-dir {} \
                 --min-abundance 0.05 --annotation-type patric --download-retries 2",
                collapsed.join("a.tsv").display(),
                dir.path().join("work").join("genomes").display()
            )
        );
        assert!(jobs.commands()[1].contains("b.tsv"));
        Ok(())
    }

    #[tokio::test]
    async fn test_collapse_run_from_split_dir() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = Arc::new(run_config(dir.path(), &["--module", "collapse"]));
        fs::create_dir_all(config.split_dir().join("sample.fasta"))?;
        fs::create_dir_all(config.reports_dir())?;
        let header = "name\ttaxID\ttaxRank\tgenomeSize\tnumReads\tnumUniqueReads\tabundance\n";
        fs::write(
            config.reports_dir().join("sample.1.fasta.tsv"),
            format!("{}E. coli\t562\tspecies\t5000\t3\t1\t1.0\n", header),
        )?;

        collapse_run(config.clone()).await?;
        let collapsed = fs::read_to_string(config.collapsed_dir().join("sample.tsv"))?;
        assert_eq!(collapsed, format!("{}E. coli\t562\tspecies\t5000\t3\t1\t1.0\n", header));
        Ok(())
    }

    #[tokio::test]
    async fn test_collapse_run_without_inputs() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = Arc::new(run_config(dir.path(), &["--module", "collapse"]));
        assert!(matches!(collapse_run(config).await, Err(PipelineError::NoInput(_))));
        Ok(())
    }
}
