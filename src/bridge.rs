//! Blocking consumption of cooperative result streams.
//!
//! [`BlockingIter`] drives a stream on a dedicated worker thread that owns a
//! single-threaded Tokio runtime, handing items to the caller through a
//! bounded channel. The caller never needs a runtime of its own.
//!
//! Lifecycle:
//! - The worker pulls at most `capacity` items ahead of the consumer.
//! - Dropping or [cancelling](BlockingIter::cancel) the iterator closes the
//!   channel; the worker notices, drops the stream (cancelling provider work)
//!   and is joined before `cancel`/`drop` returns.
//! - Creating an iterator from inside an async runtime fails with
//!   [`ShuttleError::BlockingInAsyncContext`] instead of deadlocking.

use std::iter::FusedIterator;
use std::thread::JoinHandle;

use futures_util::{Stream, StreamExt};
use tokio::runtime::{Builder, Handle};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::ShuttleError;

const WORKER_THREAD_NAME: &str = "shuttle-bridge";

enum Handoff<T> {
    Item(T),
    Done,
    Failed(ShuttleError),
}

/// Blocking iterator over a stream driven on a worker thread.
pub struct BlockingIter<T> {
    receiver: Option<mpsc::Receiver<Handoff<T>>>,
    worker: Option<JoinHandle<()>>,
    finished: bool,
}

impl<T: Send + 'static> BlockingIter<T> {
    /// Starts a worker driving `stream` with a handoff buffer of `capacity`.
    ///
    /// Nothing is polled until the worker thread starts; the first provider
    /// call therefore happens in the background right after this returns.
    ///
    /// # Errors
    ///
    /// Returns [`ShuttleError::BlockingInAsyncContext`] when called from
    /// inside a Tokio runtime, or [`ShuttleError::Bridge`] when the worker
    /// thread cannot be spawned.
    pub fn spawn<S>(stream: S, capacity: usize) -> Result<Self, ShuttleError>
    where
        S: Stream<Item = Result<T, ShuttleError>> + Send + 'static,
    {
        ensure_outside_runtime()?;
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let worker = std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || run_worker(stream, sender))
            .map_err(|error| ShuttleError::bridge(format!("failed to spawn worker: {error}")))?;
        debug!(capacity, "Started blocking bridge worker");
        Ok(Self {
            receiver: Some(receiver),
            worker: Some(worker),
            finished: false,
        })
    }
}

impl<T> BlockingIter<T> {
    /// Stops the worker and releases the stream. Idempotent.
    pub fn cancel(&mut self) {
        if !self.finished {
            debug!("Blocking bridge cancelled before exhaustion");
        }
        self.finish();
    }

    /// Returns true once the iterator can yield nothing more.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn finish(&mut self) {
        self.finished = true;
        // Closing the channel is the worker's cancellation signal.
        self.receiver = None;
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            warn!("Blocking bridge worker panicked");
        }
    }
}

impl<T> Iterator for BlockingIter<T> {
    type Item = Result<T, ShuttleError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if let Err(error) = ensure_outside_runtime() {
            self.finish();
            return Some(Err(error));
        }
        let received = self.receiver.as_mut()?.blocking_recv();
        match received {
            Some(Handoff::Item(item)) => Some(Ok(item)),
            Some(Handoff::Done) => {
                self.finish();
                None
            }
            Some(Handoff::Failed(error)) => {
                self.finish();
                Some(Err(error))
            }
            None => {
                self.finish();
                Some(Err(ShuttleError::bridge(
                    "worker stopped before the stream completed",
                )))
            }
        }
    }
}

impl<T> FusedIterator for BlockingIter<T> {}

impl<T> Drop for BlockingIter<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl<T> std::fmt::Debug for BlockingIter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingIter")
            .field("finished", &self.finished)
            .field("worker_running", &self.worker.is_some())
            .finish()
    }
}

fn ensure_outside_runtime() -> Result<(), ShuttleError> {
    if Handle::try_current().is_ok() {
        return Err(ShuttleError::BlockingInAsyncContext);
    }
    Ok(())
}

fn run_worker<T, S>(stream: S, sender: mpsc::Sender<Handoff<T>>)
where
    S: Stream<Item = Result<T, ShuttleError>>,
{
    let runtime = match Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            let failure = ShuttleError::bridge(format!("failed to build worker runtime: {error}"));
            let _ = sender.blocking_send(Handoff::Failed(failure));
            return;
        }
    };
    runtime.block_on(pump(stream, sender));
    debug!("Blocking bridge worker finished");
}

async fn pump<T, S>(stream: S, sender: mpsc::Sender<Handoff<T>>)
where
    S: Stream<Item = Result<T, ShuttleError>>,
{
    let mut stream = std::pin::pin!(stream);
    loop {
        let next = tokio::select! {
            biased;
            () = sender.closed() => {
                debug!("Consumer went away, dropping stream");
                return;
            }
            next = stream.next() => next,
        };
        let (handoff, last) = match next {
            Some(Ok(item)) => (Handoff::Item(item), false),
            Some(Err(error)) => (Handoff::Failed(error), true),
            None => (Handoff::Done, true),
        };
        if sender.send(handoff).await.is_err() || last {
            return;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use futures_util::stream;

    use super::*;

    #[test]
    fn test_yields_all_items_then_none() {
        let source = stream::iter(vec![Ok(1), Ok(2), Ok(3)]);
        let mut iter = BlockingIter::spawn(source, 1).unwrap();
        let items: Vec<u32> = iter.by_ref().map(Result::unwrap).collect();
        assert_eq!(items, vec![1, 2, 3]);
        assert!(iter.is_finished());
        assert!(iter.next().is_none(), "iterator is fused");
    }

    #[test]
    fn test_stream_error_ends_iteration() {
        let source = stream::iter(vec![Ok(1), Err(ShuttleError::internal("broken")), Ok(2)]);
        let mut iter = BlockingIter::spawn(source, 4).unwrap();
        assert_eq!(iter.next().unwrap().unwrap(), 1);
        assert!(matches!(
            iter.next(),
            Some(Err(ShuttleError::Internal { .. }))
        ));
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_drop_cancels_pending_stream() {
        struct Guard(Arc<AtomicBool>);
        impl Drop for Guard {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let dropped = Arc::new(AtomicBool::new(false));
        let guard = Guard(Arc::clone(&dropped));
        let source = stream::once(async { Ok(1_u32) })
            .chain(stream::pending())
            .map(move |item| {
                let _keep = &guard;
                item
            });

        let mut iter = BlockingIter::spawn(source, 1).unwrap();
        assert_eq!(iter.next().unwrap().unwrap(), 1);
        drop(iter);
        assert!(dropped.load(Ordering::SeqCst), "worker dropped the stream");
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let source = stream::iter(vec![Ok(1), Ok(2)]);
        let mut iter = BlockingIter::spawn(source, 1).unwrap();
        iter.cancel();
        iter.cancel();
        assert!(iter.next().is_none());
    }

    #[tokio::test]
    async fn test_spawn_inside_runtime_is_rejected() {
        let source = stream::iter(vec![Ok::<u32, ShuttleError>(1)]);
        let err = BlockingIter::spawn(source, 1).unwrap_err();
        assert!(matches!(err, ShuttleError::BlockingInAsyncContext));
    }

    #[test]
    fn test_worker_timers_are_available() {
        let source = stream::once(async {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            Ok(9_u32)
        });
        let items: Vec<u32> = BlockingIter::spawn(source, 1)
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(items, vec![9]);
    }
}
