//! Result handle returned by every orchestration call.
//!
//! A [`Discovery`] is a one-pass stream of successful items with the call's
//! error summary attached. Consume it cooperatively with `.next().await`, or
//! convert it with [`Discovery::into_blocking`] for synchronous callers.
//! Both paths yield the same items and record into the same summary.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::stream::FusedStream;
use futures_util::{Stream, StreamExt};

use crate::bridge::BlockingIter;
use crate::collector::{Collected, ErrorCollector, Ledger};
use crate::error::ShuttleError;
use crate::summary::{ErrorSummary, SummaryHandle};

/// Lazy, one-pass sequence of results from one orchestration call.
///
/// No provider work starts until the first poll. Dropping it early cancels
/// outstanding provider work; the summary then stays partial.
pub struct Discovery<T> {
    collector: ErrorCollector<T>,
    handoff_capacity: usize,
}

impl<T> Discovery<T> {
    pub(crate) fn new(collector: ErrorCollector<T>, handoff_capacity: usize) -> Self {
        Self {
            collector,
            handoff_capacity,
        }
    }

    /// Error summary for this call, partial until the stream is exhausted.
    #[must_use]
    pub fn summary(&self) -> &SummaryHandle {
        self.collector.summary()
    }

    /// Drains the stream and returns every item with the final summary.
    ///
    /// # Errors
    ///
    /// Returns [`ShuttleError`] only if error bookkeeping itself fails.
    pub async fn collect_all(mut self) -> Result<(Vec<T>, ErrorSummary), ShuttleError> {
        let mut items = Vec::new();
        while let Some(item) = self.collector.next().await {
            items.push(item?);
        }
        Ok((items, self.collector.summary().snapshot()))
    }
}

impl<T: Send + 'static> Discovery<T> {
    /// Converts into a blocking iterator driven on a worker thread.
    ///
    /// The worker may run up to `handoff_capacity` steps ahead, but the
    /// summary only counts steps the caller has actually received.
    ///
    /// # Errors
    ///
    /// Returns [`ShuttleError::BlockingInAsyncContext`] when called inside an
    /// async runtime; the discovery is consumed and its sources cancelled.
    pub fn into_blocking(self) -> Result<BlockingDiscovery<T>, ShuttleError> {
        let finished = self.collector.is_exhausted();
        let (merged, ledger) = self.collector.into_parts();
        let iter = BlockingIter::spawn(merged.map(Ok::<_, ShuttleError>), self.handoff_capacity)?;
        Ok(BlockingDiscovery {
            iter,
            ledger,
            finished,
        })
    }
}

impl<T> Stream for Discovery<T> {
    type Item = Result<T, ShuttleError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().collector.poll_next_unpin(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.collector.size_hint()
    }
}

impl<T> FusedStream for Discovery<T> {
    fn is_terminated(&self) -> bool {
        self.collector.is_terminated()
    }
}

impl<T> std::fmt::Debug for Discovery<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Discovery")
            .field("live_sources", &self.collector.live_sources())
            .field("exhausted", &self.collector.is_exhausted())
            .finish_non_exhaustive()
    }
}

/// Blocking view of a [`Discovery`].
///
/// Steps handed over by the worker are accounted here, as the caller
/// receives them; anything the worker pulled ahead is discarded on cancel.
pub struct BlockingDiscovery<T> {
    iter: BlockingIter<Collected<T>>,
    ledger: Ledger,
    finished: bool,
}

impl<T> BlockingDiscovery<T> {
    /// Error summary for this call, partial until iteration ends.
    #[must_use]
    pub fn summary(&self) -> &SummaryHandle {
        self.ledger.summary()
    }

    /// Stops the worker and cancels outstanding provider work.
    ///
    /// The summary keeps what was received so far and stays non-final.
    pub fn cancel(&mut self) {
        self.finished = true;
        self.iter.cancel();
    }
}

impl<T> Iterator for BlockingDiscovery<T> {
    type Item = Result<T, ShuttleError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            match self.iter.next() {
                Some(Ok(step)) => match self.ledger.account(step) {
                    Ok(Some(item)) => return Some(Ok(item)),
                    Ok(None) => {}
                    Err(error) => {
                        self.ledger.abandon(&error);
                        self.cancel();
                        return Some(Err(error));
                    }
                },
                Some(Err(error)) => {
                    self.finished = true;
                    return Some(Err(error));
                }
                None => {
                    self.finished = true;
                    return self.ledger.close().err().map(Err);
                }
            }
        }
    }
}

impl<T> std::iter::FusedIterator for BlockingDiscovery<T> {}

impl<T> std::fmt::Debug for BlockingDiscovery<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingDiscovery")
            .field("iter", &self.iter)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}
