// src/utils/streams.rs
use anyhow::{anyhow, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;

/// Collects every line of a child's stdout, then waits for it to exit.
///
/// # Arguments
///
/// * `child` - Spawned child with stdout piped.
///
/// # Returns
/// Vec of lines, without terminators.
pub async fn read_child_output_to_vec(child: &mut Child) -> Result<Vec<String>> {
    let out = child.stdout.take().ok_or_else(|| anyhow!("Child stdout was not piped"))?;
    let mut reader = BufReader::new(out).lines();
    let mut lines = Vec::new();
    while let Some(line) = reader.next_line().await? {
        lines.push(line);
    }
    child.wait().await?;
    Ok(lines)
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    #[tokio::test]
    async fn test_read_child_output_to_vec() -> Result<()> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("printf 'GNU parallel 20240122\\nsecond\\n'; echo oops >&2")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        let lines = read_child_output_to_vec(&mut child).await?;
        assert_eq!(lines, vec!["GNU parallel 20240122", "second"]);

        let mut child = Command::new("sh")
            .arg("-c")
            .arg("true")
            .stdout(Stdio::null())
            .spawn()?;
        assert!(read_child_output_to_vec(&mut child).await.is_err());
        child.wait().await?;
        Ok(())
    }
}
