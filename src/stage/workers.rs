//! Bounded fan-out of independent work units inside a stage.

use super::StageFailure;
use rayon::prelude::*;
use std::{
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

/// Shared request to stop the current run.
///
/// The driver checks it before every stage; workers check it before taking
/// each new unit. A [`ProcessRunner`](crate::tool::ProcessRunner) holding
/// the flag kills the tool it is running.
///
/// # Examples
///
/// ```
/// use fabline::stage::CancelFlag;
/// let flag = CancelFlag::new();
/// let handle = flag.clone();
/// handle.cancel();
/// assert!(flag.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create an unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Report whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Apply `work` to every item on a pool of at most `jobs` threads.
///
/// Results come back in input order. After the first failure, or once
/// `cancel` is set, items not yet started are skipped; the error of the
/// earliest failed item is returned, or [`StageFailure::Cancelled`].
///
/// # Errors
///
/// Returns the earliest item failure, [`StageFailure::Cancelled`] or
/// [`StageFailure::Workers`] if the pool cannot be built.
pub(crate) fn parallel_map<T, R, F>(
    items: &[T],
    jobs: NonZeroUsize,
    cancel: &CancelFlag,
    work: F,
) -> Result<Vec<R>, StageFailure>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> Result<R, StageFailure> + Sync + Send,
{
    if items.is_empty() {
        return Ok(Vec::new());
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.get().min(items.len()))
        .thread_name(|index| format!("fabline-worker-{index}"))
        .build()?;
    let failed = AtomicBool::new(false);
    let done: Vec<Option<Result<R, StageFailure>>> = pool.install(|| {
        items
            .par_iter()
            .map(|item| {
                if cancel.is_cancelled() || failed.load(Ordering::SeqCst) {
                    return None;
                }
                let result = work(item);
                if result.is_err() {
                    failed.store(true, Ordering::SeqCst);
                }
                Some(result)
            })
            .collect()
    });

    let mut results = Vec::with_capacity(done.len());
    let mut skipped = false;
    for slot in done {
        match slot {
            Some(Ok(value)) => results.push(value),
            Some(Err(err)) => return Err(err),
            None => skipped = true,
        }
    }
    if skipped {
        return Err(StageFailure::Cancelled);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::atomic::AtomicUsize;

    fn jobs(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).expect("non-zero")
    }

    #[rstest]
    #[case(1)]
    #[case(4)]
    #[case(64)]
    fn results_keep_input_order(#[case] n: usize) {
        let items: Vec<u32> = (0..20).collect();
        let doubled = parallel_map(&items, jobs(n), &CancelFlag::new(), |x| Ok(x * 2)).expect("ok");
        assert_eq!(doubled, items.iter().map(|x| x * 2).collect::<Vec<_>>());
    }

    #[rstest]
    fn earliest_failure_is_reported() {
        let items: Vec<u32> = (0..10).collect();
        let err = parallel_map(&items, jobs(1), &CancelFlag::new(), |x| {
            if *x >= 3 {
                Err(StageFailure::io(format!("unit-{x}"), std::io::Error::other("boom")))
            } else {
                Ok(*x)
            }
        })
        .expect_err("failure");
        assert!(matches!(err, StageFailure::Io { path, .. } if path == "unit-3"));
    }

    #[rstest]
    fn cancellation_stops_new_work() {
        let items: Vec<u32> = (0..10).collect();
        let cancel = CancelFlag::new();
        let started = AtomicUsize::new(0);
        let err = parallel_map(&items, jobs(1), &cancel, |_| {
            if started.fetch_add(1, Ordering::SeqCst) == 1 {
                cancel.cancel();
            }
            Ok(())
        })
        .expect_err("cancelled");
        assert!(matches!(err, StageFailure::Cancelled));
        assert_eq!(started.load(Ordering::SeqCst), 2);
    }

    #[rstest]
    fn empty_input_spawns_nothing() {
        let items: Vec<u32> = Vec::new();
        let out = parallel_map(&items, jobs(4), &CancelFlag::new(), |x| Ok(*x)).expect("ok");
        assert!(out.is_empty());
    }

    #[rstest]
    #[case(3, 8, 3)]
    #[case(16, 2, 2)]
    fn pool_never_exceeds_jobs_or_items(
        #[case] limit: usize,
        #[case] count: u32,
        #[case] expected: usize,
    ) {
        let items: Vec<u32> = (0..count).collect();
        let sizes = parallel_map(&items, jobs(limit), &CancelFlag::new(), |_| {
            Ok(rayon::current_num_threads())
        })
        .expect("ok");
        assert!(sizes.iter().all(|threads| *threads == expected));
    }
}
