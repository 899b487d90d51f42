//! Version-stamped synchronization between the two list owners.
//!
//! The producer-side holder and every consumer-side render list receive
//! update operations independently; without coordination an operation
//! could be applied twice or lost. The protocol here is optimistic:
//! every operation that crosses the boundary carries the producer's
//! post-apply version, consumers discard anything at or below the last
//! version they applied, and a (re)subscribing consumer is first handed
//! a full snapshot so no missed-update window exists.

use std::sync::{Arc, Mutex};

use futures::StreamExt;
use log::debug;

use crate::collection::{UpdateOp, VersionedList};
use crate::dataflow::multicast::{MulticastOptions, SharedChannel, Subscription};
use crate::dataflow::relay::{Relay, relay};
use crate::events::{PagingEvent, Stamped};
use crate::load_state::LoadStates;

/// Producer-side owner of the canonical list plus the broadcast that
/// keeps consumers in sync with it.
pub struct ListSynchronizer<T> {
    holder: Arc<Mutex<VersionedList<T>>>,
    states: Arc<Mutex<LoadStates>>,
    producer: Relay<Stamped<T>>,
    channel: SharedChannel<Stamped<T>>,
}

impl<T: Clone + Send + Sync + 'static> ListSynchronizer<T> {
    pub fn new() -> Self {
        let (producer, receiver) = relay::<Stamped<T>>();
        let holder = Arc::new(Mutex::new(VersionedList::new()));
        let states = Arc::new(Mutex::new(LoadStates::INITIAL));

        // The producer relay is a single-collect upstream; the channel
        // keeps it alive across subscriber churn.
        let receiver = Mutex::new(Some(receiver));
        let channel = SharedChannel::new(
            move || {
                receiver
                    .lock()
                    .expect("synchronizer upstream poisoned")
                    .take()
                    .unwrap_or_else(|| panic!("synchronizer event stream already collected"))
                    .boxed()
            },
            MulticastOptions::default(),
        )
        .with_replay({
            let holder = Arc::clone(&holder);
            let states = Arc::clone(&states);
            move || {
                let list = holder.lock().expect("list holder poisoned");
                let states = states.lock().expect("synchronizer states poisoned");
                Some(Stamped {
                    version: list.version(),
                    event: PagingEvent::ListUpdate {
                        op: UpdateOp::ReplaceAll(list.snapshot()),
                        states: states.clone(),
                    },
                })
            }
        });

        Self { holder, states, producer, channel }
    }

    pub fn len(&self) -> usize {
        self.holder.lock().expect("list holder poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn version(&self) -> u64 {
        self.holder.lock().expect("list holder poisoned").version()
    }

    pub fn snapshot(&self) -> Arc<Vec<T>> {
        self.holder.lock().expect("list holder poisoned").snapshot()
    }

    pub fn current_states(&self) -> LoadStates {
        self.states.lock().expect("synchronizer states poisoned").clone()
    }

    /// Producer path: applies the operation to the holder, stamps it
    /// with the post-apply version and broadcasts it. An out-of-range
    /// operation is a benign race: nothing is applied or broadcast.
    pub fn submit(&self, op: UpdateOp<T>, states: LoadStates) {
        let version = {
            let mut holder = self.holder.lock().expect("list holder poisoned");
            if !holder.apply(&op) {
                return;
            }
            holder.version()
        };
        *self.states.lock().expect("synchronizer states poisoned") = states.clone();
        self.producer.send(Stamped {
            version,
            event: PagingEvent::ListUpdate { op, states },
        });
    }

    /// Broadcasts a non-structural event (load state transitions),
    /// stamped with the current version.
    pub fn notify(&self, event: PagingEvent<T>) {
        let (PagingEvent::LoadStateUpdate { states, .. }
        | PagingEvent::DataSuccess { states, .. }
        | PagingEvent::ListUpdate { states, .. }) = &event;
        *self.states.lock().expect("synchronizer states poisoned") = states.clone();

        let version = self.holder.lock().expect("list holder poisoned").version();
        self.producer.send(Stamped { version, event });
    }

    /// Consumer path (reverse channel): mirrors an operation the
    /// consumer already applied locally into the holder, advancing the
    /// producer version and broadcasting to the other subscribers.
    /// Returns the new version; the originating subscription marks it
    /// applied so the echoed broadcast is discarded there and applied
    /// everywhere else; each holder sees the operation exactly once.
    pub fn push_local(&self, op: UpdateOp<T>) -> u64 {
        let (applied, version) = {
            let mut holder = self.holder.lock().expect("list holder poisoned");
            let applied = holder.apply(&op);
            (applied, holder.version())
        };
        if applied {
            let states = self.states.lock().expect("synchronizer states poisoned").clone();
            self.producer.send(Stamped {
                version,
                event: PagingEvent::ListUpdate { op, states },
            });
        }
        version
    }

    /// Subscribes a consumer. The first delivered event is always a
    /// synthetic replace-all carrying the holder's current list and
    /// version, so the consumer fully resynchronizes before seeing any
    /// incremental operation.
    pub fn subscribe(&self) -> SyncSubscription<T> {
        SyncSubscription {
            subscription: self.channel.subscribe(),
            last_applied: None,
        }
    }

}

impl<T> ListSynchronizer<T> {
    /// Terminates the broadcast; every subscriber's stream ends.
    pub fn close(&self) {
        self.channel.close();
    }
}

impl<T: Clone + Send + Sync + 'static> Default for ListSynchronizer<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// One consumer's ordered, deduplicated view of the synchronized stream.
pub struct SyncSubscription<T> {
    subscription: Subscription<Stamped<T>>,
    last_applied: Option<u64>,
}

impl<T: Clone + Send + Sync + 'static> SyncSubscription<T> {
    /// Next event this consumer has not reflected yet. List updates at
    /// or below the last applied version were already applied (locally
    /// or via the reverse channel) and are skipped; state events pass
    /// through untouched. `None` means the synchronizer closed.
    pub async fn next_event(&mut self) -> Option<Stamped<T>> {
        while let Some(stamped) = self.subscription.next().await {
            match &stamped.event {
                PagingEvent::ListUpdate { .. } => {
                    if self.last_applied.is_some_and(|last| stamped.version <= last) {
                        debug!("skipping already-applied list update v{}", stamped.version);
                        continue;
                    }
                    self.last_applied = Some(stamped.version);
                    return Some(stamped);
                }
                _ => return Some(stamped),
            }
        }
        None
    }

    /// Records a version as applied without it flowing through
    /// [`SyncSubscription::next_event`]. Used after mirroring a local
    /// operation through [`ListSynchronizer::push_local`].
    pub fn mark_applied(&mut self, version: u64) {
        let last = self.last_applied.unwrap_or(0).max(version);
        self.last_applied = Some(last);
    }

    pub fn last_applied(&self) -> Option<u64> {
        self.last_applied
    }
}
