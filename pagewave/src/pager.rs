//! The engine facade: epochs, commands and subscriptions.
//!
//! A `Pager` owns one fetcher at a time. `refresh()` ends the current
//! epoch (its task is aborted, so an in-flight load from the old epoch
//! can never apply late) and starts a new one against the initial key.
//! The list holder, the load state channel and the synchronized event
//! broadcast live across epochs, so subscribers keep their streams
//! through any number of refreshes.

use std::sync::{Arc, Mutex};

use futures::StreamExt;
use log::debug;

use crate::collection::UpdateOp;
use crate::config::PagingConfig;
use crate::dataflow::multicast::{StateChannel, Subscription};
use crate::dataflow::task::TaskHandle;
use crate::events::PagingEvent;
use crate::fetcher::PageFetcher;
use crate::load_state::LoadStates;
use crate::source::{LoadType, PageSource};
use crate::sync::{ListSynchronizer, SyncSubscription};

pub struct Pager<T, K> {
    config: PagingConfig,
    source: Arc<dyn PageSource<T, K>>,
    initial_key: K,
    states: Arc<StateChannel<LoadStates>>,
    sync: Arc<ListSynchronizer<T>>,
    epoch: Mutex<Epoch<T>>,
}

struct Epoch<T> {
    fetcher: PageFetcher<T>,
    forwarder: TaskHandle,
    generation: u64,
}

impl<T, K> Pager<T, K>
where
    T: Clone + Send + Sync + 'static,
    K: Clone + Send + Sync + 'static,
{
    /// Builds the pager and starts the first epoch; the initial refresh
    /// begins immediately.
    pub fn new(config: PagingConfig, initial_key: K, source: impl PageSource<T, K> + 'static) -> Self {
        let source: Arc<dyn PageSource<T, K>> = Arc::new(source);
        let states = Arc::new(StateChannel::new(LoadStates::INITIAL));
        let sync = Arc::new(ListSynchronizer::new());
        let epoch = spawn_epoch(1, &config, &initial_key, &source, &states, &sync);
        Self {
            config,
            source,
            initial_key,
            states,
            sync,
            epoch: Mutex::new(epoch),
        }
    }

    /// Starts over: the current epoch is cancelled (a late result from
    /// it is never applied) and a fresh fetcher refreshes from the
    /// initial key, resetting both axes.
    pub fn refresh(&self) {
        let mut epoch = self.epoch.lock().expect("pager epoch poisoned");
        debug!("refresh supersedes epoch {}", epoch.generation);
        epoch.fetcher.close();
        epoch.forwarder.abort();
        let generation = epoch.generation + 1;
        *epoch = spawn_epoch(
            generation,
            &self.config,
            &self.initial_key,
            &self.source,
            &self.states,
            &self.sync,
        );
    }

    /// Fire-and-forget append request; coalesced and guard-filtered.
    pub fn append(&self) {
        self.epoch.lock().expect("pager epoch poisoned").fetcher.append();
    }

    /// Fire-and-forget retry of whichever axis is failed.
    pub fn retry(&self) {
        self.epoch.lock().expect("pager epoch poisoned").fetcher.retry();
    }

    /// Subscribes to the synchronized event stream; the first event is
    /// always a replace-all snapshot of the current list.
    pub fn events(&self) -> SyncSubscription<T> {
        self.sync.subscribe()
    }

    /// Subscribes to load state changes; the latest value is delivered
    /// first.
    pub fn load_states(&self) -> Subscription<LoadStates> {
        self.states.subscribe()
    }

    pub fn current_states(&self) -> LoadStates {
        self.states.get_cloned()
    }

    /// Snapshot of the producer-side list.
    pub fn items(&self) -> Arc<Vec<T>> {
        self.sync.snapshot()
    }

    pub fn len(&self) -> usize {
        self.sync.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sync.is_empty()
    }

    pub fn config(&self) -> &PagingConfig {
        &self.config
    }
}

impl<T, K> Drop for Pager<T, K> {
    fn drop(&mut self) {
        // Epoch tasks abort through their handles; the channels close so
        // every subscriber ends gracefully rather than hanging.
        self.states.close();
        self.sync.close();
    }
}

fn spawn_epoch<T, K>(
    generation: u64,
    config: &PagingConfig,
    initial_key: &K,
    source: &Arc<dyn PageSource<T, K>>,
    states: &Arc<StateChannel<LoadStates>>,
    sync: &Arc<ListSynchronizer<T>>,
) -> Epoch<T>
where
    T: Clone + Send + Sync + 'static,
    K: Clone + Send + Sync + 'static,
{
    let fetcher = PageFetcher::new(
        config.clone(),
        initial_key.clone(),
        Arc::clone(source),
        Arc::clone(states),
    );
    let mut events = fetcher.take_events();
    let sync = Arc::clone(sync);

    // Translate fetcher events into stamped list updates: a refreshed
    // page replaces the list, an appended page extends it at the end.
    let forwarder = TaskHandle::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                PagingEvent::DataSuccess { items, load_type, states } => {
                    let op = match load_type {
                        LoadType::Refresh => UpdateOp::ReplaceAll(Arc::new(items)),
                        LoadType::Append => UpdateOp::InsertRange { pos: sync.len(), items },
                    };
                    sync.submit(op, states);
                }
                event => sync.notify(event),
            }
        }
    });

    Epoch { fetcher, forwarder, generation }
}
