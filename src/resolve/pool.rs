//! Fixed-size worker pool for fuzzy comparisons
//!
//! Input is split into contiguous chunks by index. Workers pull chunk
//! jobs from a crossbeam channel and send back `(chunk_no, results)`;
//! the caller reassembles chunks in index order. Each item's result
//! depends only on that item, so output is identical for any worker
//! count.

use crossbeam_channel::unbounded;
use tracing::debug;

/// Items per chunk when the caller does not care
pub const DEFAULT_CHUNK_SIZE: usize = 256;

/// Map `f` over `items` on `workers` threads, preserving input order.
pub fn map_ordered<T, R, F>(items: &[T], workers: usize, chunk_size: usize, f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync,
{
    let chunk_size = chunk_size.max(1);
    if workers <= 1 || items.len() <= chunk_size {
        return items.iter().map(&f).collect();
    }

    let (job_tx, job_rx) = unbounded::<(usize, &[T])>();
    let (result_tx, result_rx) = unbounded::<(usize, Vec<R>)>();

    let chunk_count = items.chunks(chunk_size).len();
    for (chunk_no, chunk) in items.chunks(chunk_size).enumerate() {
        // Receivers live until the scope below ends
        let _ = job_tx.send((chunk_no, chunk));
    }
    drop(job_tx);

    let f = &f;
    let mut chunks: Vec<(usize, Vec<R>)> = std::thread::scope(|scope| {
        for worker in 0..workers.min(chunk_count) {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move || {
                let mut processed = 0usize;
                for (chunk_no, chunk) in job_rx.iter() {
                    let results: Vec<R> = chunk.iter().map(f).collect();
                    processed += chunk.len();
                    if result_tx.send((chunk_no, results)).is_err() {
                        break;
                    }
                }
                debug!(worker, processed, "Fuzzy worker finished");
            });
        }
        drop(result_tx);
        result_rx.iter().collect()
    });

    chunks.sort_by_key(|(chunk_no, _)| *chunk_no);
    chunks.into_iter().flat_map(|(_, results)| results).collect()
}
