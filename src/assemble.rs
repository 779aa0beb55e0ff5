//! # Multi-Part Disk Reassembly
//!
//! Streams ordered disk parts into one image file under a bounded memory
//! budget. Parts may arrive out of order from the download phase; this
//! stage imposes strict part-number ordering at write time, so the output
//! is deterministic regardless of completion order.
//!
//! Sources are never mutated: a part may live in the staging directory
//! (ephemeral, the caller cleans up) or in the cache (must survive the
//! pull untouched).
//!
//! The copy loop reads chunks sized by the memory probe and, when the
//! host is memory-constrained, fsyncs the output every 10 chunks to cap
//! dirty-page accumulation. A final size differing from the advertised
//! sum is logged as a warning, not an error: parts may declare compressed
//! sizes while the concatenation is raw.

use crate::constants::{FSYNC_CHUNK_INTERVAL, REASSEMBLY_PROGRESS_TICKS};
use crate::error::{Error, Result};
use crate::memory::MemoryProbe;
use crate::scheduler::DiskPart;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Concatenates `parts` 1..=`total_parts` into `output`.
///
/// # Errors
///
/// [`Error::MissingPart`] when a part number has no source; I/O errors
/// from reading sources or writing the output.
pub async fn assemble_parts(
    parts: &[DiskPart],
    total_parts: u64,
    output: &Path,
    expected_size: u64,
    probe: &dyn MemoryProbe,
) -> Result<()> {
    let chunk_size = probe.optimal_chunk_size();
    let constrained = probe.memory_constrained();
    debug!(
        "assembling {} parts into {} ({} byte chunks)",
        total_parts,
        output.display(),
        chunk_size
    );

    let mut file = tokio::fs::File::create(output).await?;
    let mut buffer = vec![0u8; chunk_size as usize];
    let mut written = 0u64;
    let mut last_tick = 0u64;
    let mut chunks = 0u64;

    for number in 1..=total_parts {
        let part = parts
            .iter()
            .find(|p| p.number == number)
            .ok_or(Error::MissingPart { number })?;

        let mut source = tokio::fs::File::open(&part.source).await?;
        loop {
            let n = source.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            file.write_all(&buffer[..n]).await?;
            written += n as u64;
            chunks += 1;

            if expected_size > 0 {
                let tick = written.min(expected_size) * REASSEMBLY_PROGRESS_TICKS / expected_size;
                if tick > last_tick {
                    last_tick = tick;
                    info!(
                        "assembling disk image: {}%",
                        tick * 100 / REASSEMBLY_PROGRESS_TICKS
                    );
                }
            }

            if constrained && chunks % FSYNC_CHUNK_INTERVAL == 0 {
                file.sync_data().await?;
            }
        }
    }

    file.flush().await?;
    let final_size = file.metadata().await?.len();
    if final_size != expected_size {
        warn!(
            "assembled disk is {} bytes, manifest advertised {}",
            final_size, expected_size
        );
    }
    Ok(())
}
