use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use log::{info, warn};

use crate::config::defs::{PipelineError, RunConfig};
use crate::utils::fastx::split_sequence_file;

/// Split worker: writes `--file1` into chunks of `--max-seqs-per-file` under `--out`.
pub async fn run(config: Arc<RunConfig>) -> Result<(), PipelineError> {
    let args = &config.args;
    let input = args
        .file1
        .as_ref()
        .map(|f| {
            let path = PathBuf::from(f);
            if path.is_absolute() { path } else { config.cwd.join(path) }
        })
        .ok_or_else(|| PipelineError::InvalidConfig("--file1 is required for the split module".to_string()))?;
    if args.out_dir.is_none() {
        return Err(PipelineError::InvalidConfig("--out is required for the split module".to_string()));
    }

    let out_dir = config.out_dir.clone();
    let format = args.format;
    let max_seqs = args.max_seqs_per_file;
    info!("Splitting \"{}\" into \"{}\" ({} per file)", input.display(), out_dir.display(), max_seqs);

    let task_input = input.clone();
    let summary = tokio::task::spawn_blocking(move || split_sequence_file(&task_input, format, &out_dir, max_seqs))
        .await
        .map_err(|e| PipelineError::Other(anyhow!("Split task failed: {}", e)))??;

    if summary.sequences == 0 {
        warn!("No sequences in \"{}\"", input.display());
    }
    info!("Wrote {} sequences to {} file(s)", summary.sequences, summary.chunks.len());
    Ok(())
}
