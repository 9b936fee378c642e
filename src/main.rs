mod pipelines;
mod utils;
mod config;
mod cli;

use std::env;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use env_logger::Builder;
use log::{error, info};

use crate::cli::parse;
use crate::config::defs::{PipelineError, RunConfig, WORK_ENV};
use pipelines::{centrifuge, genomes, split};


#[tokio::main]
async fn main() -> Result<()> {
    let run_start = Instant::now();

    let args = parse();
    let cwd = env::current_dir()?;
    let exe = env::current_exe().unwrap_or_else(|_| PathBuf::from("radcot"));
    let work_root = env::var_os(WORK_ENV).map(PathBuf::from);
    let run_config = Arc::new(RunConfig::new(args, cwd, work_root, exe));

    Builder::new()
        .filter_level(run_config.log_level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();

    let module = run_config.args.module.clone();
    info!("The current directory is {:?}", run_config.cwd);

    if let Err(e) = match module.as_str() {
        "centrifuge" => centrifuge::run(run_config).await,
        "collapse" => centrifuge::collapse_run(run_config).await,
        "split" => split::run(run_config).await,
        "genomes" => genomes::run(run_config).await,
        _ => Err(PipelineError::InvalidConfig(format!("Invalid module: {}", module))),
    } {
        error!("Pipeline failed: {} at {} milliseconds.", e, run_start.elapsed().as_millis());
        std::process::exit(1);
    }

    info!("{} complete: {} milliseconds.", module, run_start.elapsed().as_millis());
    Ok(())
}
