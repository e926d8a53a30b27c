//! The reusable worker pool and the order-preserving mapper.

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::error::EstimError;

/// A rayon thread pool sized for the session.
#[derive(Debug)]
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    cores: usize,
}

impl WorkerPool {
    /// Builds a pool with `cores` workers, defaulting to the available
    /// parallelism.
    ///
    /// Numeric kernels run single-threaded inside each worker. A
    /// `thread_limit` other than 1 is reported and ignored.
    ///
    /// # Errors
    ///
    /// [`EstimError::Pool`] if `cores` is zero or the pool cannot be built.
    pub fn new(cores: Option<usize>, thread_limit: usize) -> Result<Self, EstimError> {
        let cores = cores.unwrap_or_else(|| {
            std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        });
        if cores == 0 {
            return Err(EstimError::Pool("pool needs at least one core".into()));
        }
        if thread_limit != 1 {
            warn!(
                thread_limit,
                "per-worker thread limit cannot be applied; kernels stay single-threaded"
            );
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(cores)
            .thread_name(|i| format!("augur-worker-{i}"))
            .build()
            .map_err(|e| EstimError::Pool(format!("failed to create thread pool: {e}")))?;
        debug!(cores, "worker pool created");
        Ok(Self { pool, cores })
    }

    /// Number of workers.
    pub fn cores(&self) -> usize {
        self.cores
    }

    /// Mapper running on this pool.
    pub fn mapper(&self) -> Mapper<'_> {
        Mapper::Pool(&self.pool)
    }
}

/// Maps a function over work items, in parallel or sequentially.
///
/// Both variants return results in input order.
#[derive(Debug, Clone, Copy)]
pub enum Mapper<'a> {
    /// Runs on a worker pool.
    Pool(&'a rayon::ThreadPool),
    /// Runs on the calling thread.
    Sequential,
}

impl Mapper<'_> {
    /// Applies `f` to every item.
    pub fn map<T, R, F>(&self, items: Vec<T>, f: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync + Send,
    {
        match self {
            Self::Pool(pool) => pool.install(|| items.into_par_iter().map(&f).collect()),
            Self::Sequential => items.into_iter().map(f).collect(),
        }
    }

    /// Whether work is spread over a pool.
    pub fn is_parallel(&self) -> bool {
        matches!(self, Self::Pool(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn zero_cores_rejected() {
        assert!(matches!(WorkerPool::new(Some(0), 1), Err(EstimError::Pool(_))));
    }

    #[test]
    fn pool_preserves_order() {
        let pool = WorkerPool::new(Some(4), 1).unwrap();
        assert_eq!(pool.cores(), 4);
        let mapper = pool.mapper();
        assert!(mapper.is_parallel());
        let out = mapper.map((0..64u64).collect(), |i| {
            thread::sleep(Duration::from_micros((64 - i) * 10));
            i * i
        });
        let expected: Vec<u64> = (0..64u64).map(|i| i * i).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn sequential_runs_on_caller() {
        let caller = thread::current().id();
        let out = Mapper::Sequential.map(vec![1, 2, 3], |i| (i, thread::current().id() == caller));
        assert_eq!(out, vec![(1, true), (2, true), (3, true)]);
        assert!(!Mapper::Sequential.is_parallel());
    }

    #[test]
    fn workers_are_named() {
        let pool = WorkerPool::new(Some(2), 1).unwrap();
        let names = pool.mapper().map(vec![(); 4], |()| {
            thread::current().name().map(str::to_string)
        });
        assert!(names
            .iter()
            .all(|n| n.as_deref().is_some_and(|n| n.starts_with("augur-worker-"))));
    }

    #[test]
    fn thread_limit_is_not_fatal() {
        assert!(WorkerPool::new(Some(1), 4).is_ok());
    }
}
