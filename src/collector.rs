//! Error-collecting stream over many provider sources.
//!
//! [`ErrorCollector`] merges one lazy source per provider into a single
//! stream of successful items. Provider failures never reach the consumer:
//! each one is recorded into the call's [`SummaryHandle`] and the stream
//! moves on.
//!
//! Merging and accounting are separate steps. [`MergedSources`] only
//! produces [`Collected`] steps; the summary is updated where the consumer
//! receives each step, so a consumer driven from another thread (see
//! [`crate::bridge`]) never counts work it did not observe.
//!
//! # Ordering
//!
//! Every step polls all live sources that have no buffered item, then
//! yields the first buffered item in registration order. Items from one
//! provider keep their relative order. Across providers the order depends
//! on timing, except that a provider whose item is already buffered always
//! wins over a later-registered provider.
//!
//! # Failure scopes
//!
//! - [`FailureScope::Provider`]: the source is dropped for the rest of the call.
//! - [`FailureScope::Item`]: the failure is recorded and the source continues.
//!
//! Dropping the collector before exhaustion drops every source (cancelling
//! in-flight provider work) and records nothing further.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::stream::{BoxStream, FusedStream};
use futures_util::{Stream, StreamExt, stream};
use tracing::{debug, info, warn};

use crate::error::ShuttleError;
use crate::plugin::PluginError;
use crate::summary::{PluginErrorDetail, SummaryHandle};

/// Lazy sequence from one provider, tagged with failure scope.
pub type SourceStream<T> = BoxStream<'static, Result<T, SourceFailure>>;

/// How far a recorded failure reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureScope {
    /// One item failed; the provider keeps producing.
    Item,
    /// The provider is unusable for the rest of the call.
    Provider,
}

/// A provider failure emitted by a source in place of an item.
#[derive(Debug, Clone)]
pub struct SourceFailure {
    operation: &'static str,
    scope: FailureScope,
    error: PluginError,
}

impl SourceFailure {
    /// Failure that ends the provider's participation in the call.
    #[must_use]
    pub fn provider(operation: &'static str, error: PluginError) -> Self {
        Self {
            operation,
            scope: FailureScope::Provider,
            error,
        }
    }

    /// Failure of a single item; the provider continues.
    #[must_use]
    pub fn item(operation: &'static str, error: PluginError) -> Self {
        Self {
            operation,
            scope: FailureScope::Item,
            error,
        }
    }

    /// Contract operation that failed.
    #[must_use]
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Reach of the failure.
    #[must_use]
    pub fn scope(&self) -> FailureScope {
        self.scope
    }

    /// The underlying provider error.
    #[must_use]
    pub fn error(&self) -> &PluginError {
        &self.error
    }
}

/// One merged step, not yet accounted in any summary.
#[derive(Debug)]
pub enum Collected<T> {
    /// A successful item.
    Item {
        /// Provider that produced the item
        provider_id: String,
        /// The item itself
        item: T,
    },
    /// A failure emitted in place of an item.
    Failure {
        /// Provider that failed
        provider_id: String,
        /// What failed and how far it reaches
        failure: SourceFailure,
    },
}

struct ProviderSource<T> {
    provider_id: String,
    stream: SourceStream<T>,
    ready: Option<T>,
}

/// Provider sources merged into one stream of [`Collected`] steps.
///
/// Applies failure scopes (a provider failure drops its source) but
/// records nothing.
pub struct MergedSources<T> {
    sources: Vec<ProviderSource<T>>,
}

impl<T> Default for MergedSources<T> {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
        }
    }
}

// Buffered items are never pinned in place.
impl<T> Unpin for MergedSources<T> {}

impl<T> MergedSources<T> {
    /// Adds a provider source. Call in registration order.
    pub fn push_source(&mut self, provider_id: impl Into<String>, stream: SourceStream<T>) {
        self.sources.push(ProviderSource {
            provider_id: provider_id.into(),
            stream,
            ready: None,
        });
    }

    /// Number of sources still producing.
    #[must_use]
    pub fn live_sources(&self) -> usize {
        self.sources.len()
    }

    fn buffered(&self) -> usize {
        self.sources.iter().filter(|s| s.ready.is_some()).count()
    }
}

impl<T> Stream for MergedSources<T> {
    type Item = Collected<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        let mut index = 0;
        while index < this.sources.len() {
            let source = &mut this.sources[index];
            if source.ready.is_some() {
                index += 1;
                continue;
            }
            match source.stream.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(item))) => {
                    source.ready = Some(item);
                    index += 1;
                }
                Poll::Ready(Some(Err(failure))) => {
                    let provider_id = source.provider_id.clone();
                    if failure.scope == FailureScope::Provider {
                        debug!(data_hub = %provider_id, "Skipping provider for rest of call");
                        this.sources.remove(index);
                    }
                    return Poll::Ready(Some(Collected::Failure {
                        provider_id,
                        failure,
                    }));
                }
                Poll::Ready(None) => {
                    debug!(data_hub = %source.provider_id, "Provider source exhausted");
                    this.sources.remove(index);
                }
                Poll::Pending => index += 1,
            }
        }

        let next = this.sources.iter_mut().find_map(|source| {
            source
                .ready
                .take()
                .map(|item| (source.provider_id.clone(), item))
        });
        match next {
            Some((provider_id, item)) => Poll::Ready(Some(Collected::Item { provider_id, item })),
            None if this.sources.is_empty() => Poll::Ready(None),
            None => Poll::Pending,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.buffered(), None)
    }
}

/// Records [`Collected`] steps into one call's summary.
#[derive(Debug, Clone)]
pub(crate) struct Ledger {
    summary: SummaryHandle,
    operation: &'static str,
}

impl Ledger {
    pub(crate) fn new(operation: &'static str, summary: SummaryHandle) -> Self {
        Self { summary, operation }
    }

    pub(crate) fn summary(&self) -> &SummaryHandle {
        &self.summary
    }

    /// Accounts one step, handing back the item if it carried one.
    pub(crate) fn account<T>(&self, step: Collected<T>) -> Result<Option<T>, ShuttleError> {
        match step {
            Collected::Item { provider_id, item } => {
                self.summary.record_result(&provider_id)?;
                Ok(Some(item))
            }
            Collected::Failure {
                provider_id,
                failure,
            } => {
                let message = failure.error.to_string();
                warn!(
                    data_hub = %provider_id,
                    operation = failure.operation,
                    scope = ?failure.scope,
                    error = %message,
                    "Provider operation failed"
                );
                self.summary.record_error(PluginErrorDetail::new(
                    &provider_id,
                    failure.operation,
                    message,
                ))?;
                Ok(None)
            }
        }
    }

    /// Marks the summary final once every source is exhausted.
    pub(crate) fn close(&self) -> Result<(), ShuttleError> {
        let summary = self.summary.finalize()?;
        info!(
            operation = self.operation,
            total_results = summary.total_results,
            total_errors = summary.total_errors,
            "Collection complete"
        );
        Ok(())
    }

    pub(crate) fn abandon(&self, error: &ShuttleError) {
        warn!(operation = self.operation, error = %error, "Error collection aborted");
    }
}

/// Merges provider sources, yielding successes and recording failures.
///
/// The stream only ever yields `Err` when its own bookkeeping breaks; it
/// then terminates.
pub struct ErrorCollector<T> {
    merged: MergedSources<T>,
    ledger: Ledger,
    exhausted: bool,
}

impl<T> ErrorCollector<T> {
    /// Creates a collector recording into `summary`.
    ///
    /// `operation` names the orchestration call in log output.
    #[must_use]
    pub fn new(operation: &'static str, summary: SummaryHandle) -> Self {
        Self {
            merged: MergedSources::default(),
            ledger: Ledger::new(operation, summary),
            exhausted: false,
        }
    }

    /// Adds a provider source. Call in registration order.
    pub fn push_source(&mut self, provider_id: impl Into<String>, stream: SourceStream<T>) {
        self.merged.push_source(provider_id, stream);
    }

    /// Handle to the summary this collector records into.
    #[must_use]
    pub fn summary(&self) -> &SummaryHandle {
        self.ledger.summary()
    }

    /// Returns true once the collector has yielded its final `None`.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Number of sources still producing.
    #[must_use]
    pub fn live_sources(&self) -> usize {
        self.merged.live_sources()
    }

    /// Splits into the unaccounted merge and its ledger.
    ///
    /// The caller takes over accounting, including the final close.
    pub(crate) fn into_parts(mut self) -> (MergedSources<T>, Ledger) {
        self.exhausted = true;
        (std::mem::take(&mut self.merged), self.ledger.clone())
    }

    fn abort(&mut self, error: ShuttleError) -> Poll<Option<Result<T, ShuttleError>>> {
        self.ledger.abandon(&error);
        self.merged = MergedSources::default();
        self.exhausted = true;
        Poll::Ready(Some(Err(error)))
    }
}

impl<T> Stream for ErrorCollector<T> {
    type Item = Result<T, ShuttleError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.exhausted {
            return Poll::Ready(None);
        }

        loop {
            let step = match this.merged.poll_next_unpin(cx) {
                Poll::Ready(step) => step,
                Poll::Pending => return Poll::Pending,
            };
            let Some(step) = step else {
                this.exhausted = true;
                return match this.ledger.close() {
                    Ok(()) => Poll::Ready(None),
                    Err(error) => Poll::Ready(Some(Err(error))),
                };
            };
            match this.ledger.account(step) {
                Ok(Some(item)) => return Poll::Ready(Some(Ok(item))),
                Ok(None) => {}
                Err(error) => return this.abort(error),
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.exhausted {
            return (0, Some(0));
        }
        self.merged.size_hint()
    }
}

impl<T> FusedStream for ErrorCollector<T> {
    fn is_terminated(&self) -> bool {
        self.exhausted
    }
}

impl<T> Drop for ErrorCollector<T> {
    fn drop(&mut self) {
        if !self.exhausted && self.merged.live_sources() > 0 {
            debug!(
                operation = self.ledger.operation,
                pending_sources = self.merged.live_sources(),
                "Collector dropped before exhaustion, cancelling sources"
            );
        }
    }
}

/// Bounds every step of `stream` by `limit`.
///
/// A step that exceeds the limit yields one provider-scoped timeout failure
/// for `operation` and ends the source. Requires a Tokio runtime with the
/// time driver enabled.
#[must_use]
pub fn with_step_timeout<T: Send + 'static>(
    provider_id: &str,
    operation: &'static str,
    stream: SourceStream<T>,
    limit: Duration,
) -> SourceStream<T> {
    let provider_id = provider_id.to_string();
    let elapsed_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
    stream::unfold(Some(stream), move |state| {
        let provider_id = provider_id.clone();
        async move {
            let mut stream = state?;
            match tokio::time::timeout(limit, stream.next()).await {
                Ok(Some(item)) => Some((item, Some(stream))),
                Ok(None) => None,
                Err(_) => {
                    let error = PluginError::timeout(&provider_id, elapsed_ms);
                    Some((Err(SourceFailure::provider(operation, error)), None))
                }
            }
        }
    })
    .boxed()
}

/// Runs one provider call, bounded by `limit` when set.
///
/// An elapsed limit becomes [`PluginError::Timeout`] for `provider_id`.
pub(crate) async fn call_with_timeout<R, F>(
    provider_id: &str,
    limit: Option<Duration>,
    call: F,
) -> Result<R, PluginError>
where
    F: Future<Output = Result<R, PluginError>>,
{
    let Some(limit) = limit else {
        return call.await;
    };
    tokio::time::timeout(limit, call).await.unwrap_or_else(|_| {
        let elapsed_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
        Err(PluginError::timeout(provider_id, elapsed_ms))
    })
}
