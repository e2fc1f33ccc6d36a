//! Bounded worker pool for per-peer work inside a round's finalize

use crate::{Error, Result};
#[cfg(feature = "multi-thread")]
use std::sync::Arc;

/// Worker pool shared by the rounds of a session.
///
/// With the `multi-thread` feature the pool is a fixed-size rayon pool;
/// otherwise all work runs inline on the caller's thread.
#[derive(Clone)]
pub struct Pool {
    #[cfg(feature = "multi-thread")]
    inner: Option<Arc<rayon::ThreadPool>>,
    workers: usize,
}

impl Pool {
    /// Pool with a fixed number of workers
    pub fn new(workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(Error::InvalidConfig("Worker pool needs at least one worker".into()));
        }

        #[cfg(feature = "multi-thread")]
        {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(|i| format!("cmp-worker-{i}"))
                .build()
                .map_err(|e| Error::InvalidConfig(e.to_string()))?;
            Ok(Self {
                inner: Some(Arc::new(pool)),
                workers,
            })
        }

        #[cfg(not(feature = "multi-thread"))]
        Ok(Self { workers })
    }

    /// Pool that runs everything on the calling thread
    pub fn inline() -> Self {
        Self {
            #[cfg(feature = "multi-thread")]
            inner: None,
            workers: 1,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Apply `f` to every item; results come back in input order.
    /// Fails if any item fails.
    pub fn map<T, U, F>(&self, items: Vec<T>, f: F) -> Result<Vec<U>>
    where
        T: Send,
        U: Send,
        F: Fn(T) -> Result<U> + Send + Sync,
    {
        #[cfg(feature = "multi-thread")]
        if let Some(pool) = &self.inner {
            use rayon::prelude::*;
            return pool.install(|| items.into_par_iter().map(&f).collect());
        }

        items.into_iter().map(f).collect()
    }
}

impl Default for Pool {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::new(workers).unwrap_or_else(|_| Self::inline())
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool").field("workers", &self.workers).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_keeps_order() {
        let pool = Pool::new(3).unwrap();
        let out = pool.map((0..50u64).collect(), |x| Ok(x * 2)).unwrap();
        assert_eq!(out, (0..50u64).map(|x| x * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_map_propagates_errors() {
        let pool = Pool::inline();
        let out = pool.map(vec![1, 2, 3], |x| {
            if x == 2 {
                Err(Error::Internal("boom".into()))
            } else {
                Ok(x)
            }
        });
        assert!(out.is_err());
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert!(Pool::new(0).is_err());
    }
}
