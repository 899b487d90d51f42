//! The load sequencer: one fetcher per refresh epoch.
//!
//! A fetcher is the single authority over the next key and the load
//! states. It refreshes immediately on construction, then sits in a
//! select loop over the coalesced append/retry signals. Requests are
//! never queued: a request that arrives while its axis is loading (or
//! otherwise disallowed) is dropped, which keeps the at-most-one-
//! in-flight discipline without any bookkeeping on the caller's side.

use std::sync::{Arc, Mutex};

use futures::StreamExt;
use futures::channel::mpsc::UnboundedReceiver;
use futures::select;
use log::debug;

use crate::config::PagingConfig;
use crate::dataflow::multicast::StateChannel;
use crate::dataflow::relay::{Relay, SignalRelay, SignalStream, relay};
use crate::dataflow::task::TaskHandle;
use crate::error::LoadError;
use crate::events::PagingEvent;
use crate::load_state::{LoadState, LoadStates};
use crate::source::{LoadParams, LoadResult, LoadType, PageSource};

/// Upper bound on consecutive empty pages the sequencer silently skips
/// while advancing keys; past it the load fails as an invalid result.
const MAX_EMPTY_ADVANCES: usize = 64;

/// Sequencer for one refresh epoch.
pub struct PageFetcher<T> {
    append_relay: SignalRelay,
    retry_relay: SignalRelay,
    states: Arc<StateChannel<LoadStates>>,
    events_rx: Mutex<Option<UnboundedReceiver<PagingEvent<T>>>>,
    task: TaskHandle,
}

impl<T: Clone + Send + Sync + 'static> PageFetcher<T> {
    /// Starts the epoch: both axes reset and a refresh load begins
    /// immediately.
    pub fn new<K: Clone + Send + Sync + 'static>(
        config: PagingConfig,
        initial_key: K,
        source: Arc<dyn PageSource<T, K>>,
        states: Arc<StateChannel<LoadStates>>,
    ) -> Self {
        let (append_relay, append_signals) = SignalRelay::new();
        let (retry_relay, retry_signals) = SignalRelay::new();
        let (events_tx, events_rx) = relay();

        let task = TaskHandle::spawn(run(
            config,
            initial_key,
            source,
            Arc::clone(&states),
            events_tx,
            append_signals,
            retry_signals,
        ));

        Self {
            append_relay,
            retry_relay,
            states,
            events_rx: Mutex::new(Some(events_rx)),
            task,
        }
    }

    /// Requests an append load. Fire-and-forget and coalesced; dropped
    /// when the current state disallows appending.
    pub fn append(&self) {
        self.append_relay.signal();
    }

    /// Requests a retry of whichever axis is failed. Fire-and-forget
    /// and coalesced; a no-op when nothing failed.
    pub fn retry(&self) {
        self.retry_relay.signal();
    }

    /// Current load states snapshot.
    pub fn load_states(&self) -> LoadStates {
        self.states.get_cloned()
    }

    /// The epoch's event stream. Single consumer; taking it twice is a
    /// programming error.
    pub fn take_events(&self) -> UnboundedReceiver<PagingEvent<T>> {
        self.events_rx
            .lock()
            .expect("fetcher event stream poisoned")
            .take()
            .unwrap_or_else(|| panic!("fetcher event stream already collected"))
    }

    /// Ends the epoch: the sequencer task stops and the event stream
    /// terminates promptly. Safe to call any number of times.
    pub fn close(&self) {
        self.task.abort();
    }
}

impl<T> Drop for PageFetcher<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run<T, K>(
    config: PagingConfig,
    initial_key: K,
    source: Arc<dyn PageSource<T, K>>,
    states: Arc<StateChannel<LoadStates>>,
    events: Relay<PagingEvent<T>>,
    mut append_signals: SignalStream,
    mut retry_signals: SignalStream,
) where
    T: Clone + Send + Sync + 'static,
    K: Clone + Send + Sync + 'static,
{
    states.set(LoadStates::INITIAL);
    let mut next_key: Option<K> = None;

    // Refresh is implicit on construction.
    load(LoadType::Refresh, &config, &source, &states, &events, &mut next_key, &initial_key)
        .await;
    append_signals.clear();
    retry_signals.clear();

    loop {
        let started = select! {
            signal = append_signals.next() => match signal {
                Some(()) => {
                    let current = states.get_cloned();
                    // A failed append axis is gated by the auto-retry
                    // option instead of the regular guard.
                    let allowed = if current.append.is_failure() {
                        config.append_failure_auto_retry
                    } else {
                        current.is_allow_append()
                    };
                    if allowed {
                        load(
                            LoadType::Append,
                            &config,
                            &source,
                            &states,
                            &events,
                            &mut next_key,
                            &initial_key,
                        )
                        .await;
                        true
                    } else {
                        debug!("append request dropped in state {current:?}");
                        false
                    }
                }
                None => break,
            },
            signal = retry_signals.next() => match signal {
                Some(()) => {
                    let current = states.get_cloned();
                    let axis = if current.refresh.is_failure() {
                        Some(LoadType::Refresh)
                    } else if current.append.is_failure() {
                        Some(LoadType::Append)
                    } else {
                        None
                    };
                    match axis {
                        Some(load_type) => {
                            load(
                                load_type,
                                &config,
                                &source,
                                &states,
                                &events,
                                &mut next_key,
                                &initial_key,
                            )
                            .await;
                            true
                        }
                        None => {
                            debug!("retry request dropped, no failed axis");
                            false
                        }
                    }
                }
                None => break,
            },
        };

        // Signals raised while a load was in flight were issued against
        // a state that disallowed them; drop them instead of replaying.
        if started {
            append_signals.clear();
            retry_signals.clear();
        }
    }
}

async fn load<T, K>(
    load_type: LoadType,
    config: &PagingConfig,
    source: &Arc<dyn PageSource<T, K>>,
    states: &StateChannel<LoadStates>,
    events: &Relay<PagingEvent<T>>,
    next_key: &mut Option<K>,
    initial_key: &K,
) where
    T: Clone + Send + Sync + 'static,
    K: Clone + Send + Sync + 'static,
{
    let loading = with_axis(states.get_cloned(), load_type, LoadState::Loading);
    states.set(loading.clone());
    events.send(PagingEvent::LoadStateUpdate { load_type, states: loading });

    let mut key = match load_type {
        LoadType::Refresh => initial_key.clone(),
        LoadType::Append => match next_key.clone() {
            Some(key) => key,
            // Guarded against upstream; an append without a key means
            // the source is already exhausted.
            None => {
                finish(load_type, LoadState::Success { is_fully: true }, states, events);
                return;
            }
        },
    };

    let mut advances = 0usize;
    loop {
        let params = LoadParams {
            load_type,
            key: key.clone(),
            page_size: config.page_size_for(load_type),
        };
        match source.load(params).await {
            LoadResult::Success { items, next_key: new_key } => {
                if items.is_empty() {
                    if let Some(advanced) = new_key {
                        if config.load_result_empty_fetch_next && advances < MAX_EMPTY_ADVANCES {
                            advances += 1;
                            key = advanced;
                            // Yield between iterations so a key-skipping
                            // source cannot monopolize the context.
                            tokio::task::yield_now().await;
                            continue;
                        }
                        finish(
                            load_type,
                            LoadState::Failure { error: LoadError::InvalidResult },
                            states,
                            events,
                        );
                        return;
                    }
                }
                *next_key = new_key;
                let is_fully = next_key.is_none();
                let updated =
                    with_axis(states.get_cloned(), load_type, LoadState::Success { is_fully });
                states.set(updated.clone());
                events.send(PagingEvent::DataSuccess { items, load_type, states: updated });
                return;
            }
            LoadResult::Failure { error } => {
                debug!("{load_type:?} load failed: {error}");
                finish(load_type, LoadState::Failure { error }, states, events);
                return;
            }
        }
    }
}

fn with_axis(states: LoadStates, load_type: LoadType, state: LoadState) -> LoadStates {
    match load_type {
        LoadType::Refresh => states.with_refresh(state),
        LoadType::Append => states.with_append(state),
    }
}

fn finish<T: Clone>(
    load_type: LoadType,
    state: LoadState,
    states: &StateChannel<LoadStates>,
    events: &Relay<PagingEvent<T>>,
) {
    let updated = with_axis(states.get_cloned(), load_type, state);
    states.set(updated.clone());
    events.send(PagingEvent::LoadStateUpdate { load_type, states: updated });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    // Source yielding `page_size` numbered items per key, exhausted
    // after `max_page` pages.
    fn paged_source(
        max_page: u32,
        calls: Arc<AtomicUsize>,
    ) -> impl PageSource<u32, u32> {
        move |params: LoadParams<u32>| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                let base = params.key * 100;
                let items: Vec<u32> = (0..10).map(|i| base + i).collect();
                let next_key = if params.key >= max_page { None } else { Some(params.key + 1) };
                LoadResult::Success { items, next_key }
            }
        }
    }

    fn fetcher_with(
        config: PagingConfig,
        source: impl PageSource<u32, u32> + 'static,
    ) -> PageFetcher<u32> {
        let _ = env_logger::builder().is_test(true).try_init();
        let states = Arc::new(StateChannel::new(LoadStates::INITIAL));
        PageFetcher::new(config, 1, Arc::new(source) as Arc<dyn PageSource<u32, u32>>, states)
    }

    fn drain_events(receiver: &mut UnboundedReceiver<PagingEvent<u32>>) -> Vec<PagingEvent<u32>> {
        let mut events = Vec::new();
        while let Ok(Some(event)) = receiver.try_next() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn two_pages_then_append_while_fully_is_dropped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = fetcher_with(PagingConfig::default(), paged_source(2, Arc::clone(&calls)));
        let mut events = fetcher.take_events();

        tokio::time::sleep(Duration::from_millis(20)).await;
        fetcher.append();
        tokio::time::sleep(Duration::from_millis(20)).await;
        // Append axis is now fully loaded: this request must be dropped.
        fetcher.append();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let states = fetcher.load_states();
        assert_eq!(states.append, LoadState::Success { is_fully: true });

        let total_items: usize = drain_events(&mut events)
            .iter()
            .map(|event| match event {
                PagingEvent::DataSuccess { items, .. } => items.len(),
                _ => 0,
            })
            .sum();
        assert_eq!(total_items, 20);
    }

    #[tokio::test]
    async fn append_requests_coalesce_while_loading() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counting = Arc::clone(&calls);
        let source = move |params: LoadParams<u32>| {
            counting.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(40)).await;
                LoadResult::Success {
                    items: vec![params.key],
                    next_key: Some(params.key + 1),
                }
            }
        };
        let fetcher = fetcher_with(PagingConfig::default(), source);

        tokio::time::sleep(Duration::from_millis(60)).await;
        fetcher.append();
        fetcher.append();
        fetcher.append();
        tokio::time::sleep(Duration::from_millis(120)).await;

        // One refresh plus exactly one append, no matter how many
        // requests raced the in-flight load.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_without_a_failed_axis_is_a_no_op() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = fetcher_with(PagingConfig::default(), paged_source(9, Arc::clone(&calls)));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        fetcher.retry();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_refresh_recovers_through_retry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counting = Arc::clone(&calls);
        let source = move |_params: LoadParams<u32>| {
            let attempt = counting.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    LoadResult::Failure { error: LoadError::message("offline") }
                } else {
                    LoadResult::Success { items: vec![7], next_key: None }
                }
            }
        };
        let fetcher = fetcher_with(PagingConfig::default(), source);
        let mut events = fetcher.take_events();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let before_retry = drain_events(&mut events);
        let refresh_states: Vec<&LoadState> = before_retry
            .iter()
            .map(|event| match event {
                PagingEvent::LoadStateUpdate { states, .. }
                | PagingEvent::DataSuccess { states, .. }
                | PagingEvent::ListUpdate { states, .. } => &states.refresh,
            })
            .collect();
        assert_eq!(
            refresh_states,
            vec![
                &LoadState::Loading,
                &LoadState::Failure { error: LoadError::message("offline") },
            ]
        );

        fetcher.retry();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let after_retry = drain_events(&mut events);
        let failures = after_retry
            .iter()
            .filter(|event| match event {
                PagingEvent::LoadStateUpdate { states, .. }
                | PagingEvent::DataSuccess { states, .. }
                | PagingEvent::ListUpdate { states, .. } => states.refresh.is_failure(),
            })
            .count();
        assert_eq!(failures, 0, "one failure total, observed before the retry");

        let states = fetcher.load_states();
        assert_eq!(states.refresh, LoadState::Success { is_fully: true });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_pages_advance_keys_silently() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counting = Arc::clone(&calls);
        let source = move |params: LoadParams<u32>| {
            counting.fetch_add(1, Ordering::SeqCst);
            async move {
                if params.key < 3 {
                    LoadResult::Success { items: Vec::new(), next_key: Some(params.key + 1) }
                } else {
                    LoadResult::Success { items: vec![42], next_key: None }
                }
            }
        };
        let fetcher = fetcher_with(PagingConfig::default(), source);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(fetcher.load_states().refresh, LoadState::Success { is_fully: true });
    }

    #[tokio::test]
    async fn empty_pages_fail_when_advancing_is_disabled() {
        let source = |params: LoadParams<u32>| async move {
            LoadResult::Success { items: Vec::<u32>::new(), next_key: Some(params.key + 1) }
        };
        let config = PagingConfig { load_result_empty_fetch_next: false, ..Default::default() };
        let fetcher = fetcher_with(config, source);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            fetcher.load_states().refresh,
            LoadState::Failure { error: LoadError::InvalidResult }
        );
    }

    // Source whose refresh succeeds and whose appends always fail.
    fn append_failing_source(calls: Arc<AtomicUsize>) -> impl PageSource<u32, u32> {
        move |params: LoadParams<u32>| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                match params.load_type {
                    LoadType::Refresh => LoadResult::Success {
                        items: vec![1],
                        next_key: Some(params.key + 1),
                    },
                    LoadType::Append => LoadResult::Failure {
                        error: LoadError::message("append broke"),
                    },
                }
            }
        }
    }

    #[tokio::test]
    async fn append_failure_honors_the_auto_retry_option() {
        // Default config: an append while the axis is failed is dropped.
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher =
            fetcher_with(PagingConfig::default(), append_failing_source(Arc::clone(&calls)));
        tokio::time::sleep(Duration::from_millis(20)).await;
        fetcher.append();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        fetcher.append();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2, "dropped without auto-retry");

        // With the option on, the same request retries the axis.
        let retry_calls = Arc::new(AtomicUsize::new(0));
        let config = PagingConfig { append_failure_auto_retry: true, ..Default::default() };
        let fetcher = fetcher_with(config, append_failing_source(Arc::clone(&retry_calls)));
        tokio::time::sleep(Duration::from_millis(20)).await;
        fetcher.append();
        tokio::time::sleep(Duration::from_millis(20)).await;
        fetcher.append();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(retry_calls.load(Ordering::SeqCst), 3, "refresh plus two append attempts");
    }

    #[tokio::test]
    async fn closing_ends_the_event_stream() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = fetcher_with(PagingConfig::default(), paged_source(9, Arc::clone(&calls)));
        let mut events = fetcher.take_events();

        tokio::time::sleep(Duration::from_millis(20)).await;
        fetcher.close();
        fetcher.close();
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Buffered events drain, then the stream terminates.
        while let Some(_event) = events.next().await {}
        assert!(events.try_next().expect("terminated stream").is_none());
    }

    #[tokio::test]
    #[should_panic(expected = "already collected")]
    async fn event_stream_is_single_consumer() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = fetcher_with(PagingConfig::default(), paged_source(2, calls));
        let _first = fetcher.take_events();
        let _second = fetcher.take_events();
    }
}
