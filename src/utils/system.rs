// src/utils/system.rs: System functions

use log::{debug, warn};
use sysinfo::System;


/// Number of physical cores, falling back to 1 when it cannot be read.
pub fn physical_cores() -> usize {
    System::physical_core_count().unwrap_or(1).max(1)
}


/// Total worker threads a batch can ask for when every job runs at once.
///
/// # Arguments
///
/// * `threads` - Threads per classifier instance
/// * `procs` - Concurrent jobs per batch
/// * `cores` - Physical cores available
///
/// # Returns
///
/// Some(requested) when the request exceeds `cores`, None otherwise.
pub fn oversubscription(threads: usize, procs: usize, cores: usize) -> Option<usize> {
    let requested = threads.max(1).saturating_mul(procs.max(1));
    if requested > cores {
        Some(requested)
    } else {
        None
    }
}

pub fn warn_if_oversubscribed(threads: usize, procs: usize) {
    let cores = physical_cores();
    debug!("Detected {} physical cores", cores);
    if let Some(requested) = oversubscription(threads, procs, cores) {
        warn!(
            "--threads {} x --procs {} asks for {} threads on {} physical cores",
            threads, procs, requested, cores
        );
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oversubscription() {
        assert_eq!(oversubscription(4, 4, 8), Some(16));
        assert_eq!(oversubscription(2, 4, 8), None);
        assert_eq!(oversubscription(0, 0, 1), None);
        assert!(physical_cores() >= 1);
    }
}
