//! Bounded fan-out/fan-in over a fixed set of keyed work items.
//!
//! Every item runs as its own tokio task, admitted through a semaphore so at
//! most `concurrency` units of work are active at once. The first failure
//! wins a single-slot channel, cancels the shared [`CancellationToken`] and is
//! returned straight away; tasks still running are left to finish in the
//! background and their results are dropped. Items that had not started yet
//! see the cancelled token after admission and skip their work. If a parent
//! token skips any item, the whole call fails with [`Error::Cancelled`]; a
//! partial map is never returned.
//!
//! ```no_run
//! use range_dl::executor::execute;
//!
//! # async fn example() -> range_dl::Result<()> {
//! let squares = execute(vec![1u32, 2, 3], 2, |n, _cancel| async move {
//!     Ok(n * n)
//! })
//! .await?;
//! assert_eq!(squares[&3], 9);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Concurrency-capped executor with first-error cancellation
#[derive(Clone, Debug)]
pub struct BoundedExecutor {
    concurrency: usize,
    parent: Option<CancellationToken>,
}

impl BoundedExecutor {
    /// Executor running at most `concurrency` units of work at once (minimum 1)
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            parent: None,
        }
    }

    /// Derive each invocation's token from `parent`, so cancelling the parent
    /// also stops work that has not started yet
    pub fn with_parent(mut self, parent: CancellationToken) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Maximum number of concurrently running units of work
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run `f` for every item and collect the results by key.
    ///
    /// Returns the complete map when every item succeeded, otherwise exactly
    /// one error (the first observed) and no results. Items skipped because
    /// the parent token fired turn the call into [`Error::Cancelled`].
    pub async fn execute<K, V, F, Fut>(&self, items: Vec<K>, f: F) -> Result<HashMap<K, V>>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Send + 'static,
        F: Fn(K, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        if items.is_empty() {
            return Ok(HashMap::new());
        }

        let cancel = match &self.parent {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let results = Arc::new(Mutex::new(HashMap::with_capacity(items.len())));
        let (err_tx, mut err_rx) = mpsc::channel::<Error>(1);
        let skipped = Arc::new(AtomicBool::new(false));
        let f = Arc::new(f);

        let mut workers: FuturesUnordered<_> = items
            .into_iter()
            .map(|item| {
                let semaphore = Arc::clone(&semaphore);
                let results = Arc::clone(&results);
                let cancel = cancel.clone();
                let err_tx = err_tx.clone();
                let skipped = Arc::clone(&skipped);
                let f = Arc::clone(&f);

                tokio::spawn(async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        skipped.store(true, Ordering::SeqCst);
                        return;
                    };
                    if cancel.is_cancelled() {
                        skipped.store(true, Ordering::SeqCst);
                        return;
                    }

                    match f(item.clone(), cancel.clone()).await {
                        Ok(value) => {
                            results.lock().await.insert(item, value);
                        }
                        Err(e) => {
                            // Publish before cancelling so a sibling's Cancelled
                            // cannot take the slot ahead of the real cause
                            if err_tx.try_send(e).is_err() {
                                tracing::trace!("Dropping error, first error already reported");
                            }
                            cancel.cancel();
                        }
                    }
                })
            })
            .collect();
        drop(err_tx);

        loop {
            tokio::select! {
                biased;
                Some(err) = err_rx.recv() => {
                    cancel.cancel();
                    return Err(err);
                }
                joined = workers.next() => match joined {
                    Some(Ok(())) => {}
                    Some(Err(join_err)) => {
                        cancel.cancel();
                        return Err(Error::TaskFailed(join_err.to_string()));
                    }
                    None => break,
                },
            }
        }

        // A worker may have reported right before the last join completed
        if let Ok(err) = err_rx.try_recv() {
            cancel.cancel();
            return Err(err);
        }

        if skipped.load(Ordering::SeqCst) {
            tracing::debug!("Executor cancelled before every item ran");
            return Err(Error::Cancelled);
        }

        let mut guard = results.lock().await;
        Ok(std::mem::take(&mut *guard))
    }

    /// Fire-and-signal variant: run `f` for every item with the same
    /// cancellation rules, keeping no per-item values.
    ///
    /// `Ok(())` means every item succeeded.
    pub async fn run_all<K, F, Fut>(&self, items: Vec<K>, f: F) -> Result<()>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        F: Fn(K, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.execute(items, f).await.map(|_| ())
    }
}

/// Run `f` for every item with at most `concurrency` in flight; see [`BoundedExecutor::execute`].
pub async fn execute<K, V, F, Fut>(items: Vec<K>, concurrency: usize, f: F) -> Result<HashMap<K, V>>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + 'static,
    F: Fn(K, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V>> + Send + 'static,
{
    BoundedExecutor::new(concurrency).execute(items, f).await
}

/// Fire-and-signal counterpart of [`execute`]; see [`BoundedExecutor::run_all`].
pub async fn run_all<K, F, Fut>(items: Vec<K>, concurrency: usize, f: F) -> Result<()>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    F: Fn(K, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    BoundedExecutor::new(concurrency).run_all(items, f).await
}
