//! # Threading Configuration
//!
//! ## Role
//! Build the fixed-size rayon pool the MC3 scheduler dispatches chains to.
//! The pool size is independent of the number of chains; with fewer threads
//! than chains, chains queue within a cycle.

use crate::error::{McmcError, Result};

/// Create a pool with `n_threads` named workers
pub fn build_thread_pool(n_threads: usize) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(n_threads.max(1))
        .thread_name(|i| format!("arg-mc3-worker-{}", i))
        .build()
        .map_err(|e| McmcError::config(format!("Failed to create thread pool: {}", e)))
}

/// Available parallelism, falling back to one thread
pub fn default_thread_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_size_and_names() {
        let pool = build_thread_pool(2).unwrap();
        assert_eq!(pool.current_num_threads(), 2);
        let name = pool.install(|| std::thread::current().name().map(str::to_string));
        assert!(name.unwrap().starts_with("arg-mc3-worker-"));
    }

    #[test]
    fn test_zero_threads_means_one() {
        assert_eq!(build_thread_pool(0).unwrap().current_num_threads(), 1);
        assert!(default_thread_count() >= 1);
    }
}
