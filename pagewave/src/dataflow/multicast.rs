//! Multicast hot channels.
//!
//! A cold upstream stream can only be collected once; these channels
//! turn it into a broadcast that 0..N subscribers can join and re-join.
//! The upstream is activated lazily on the first subscription, a
//! reference count drives the configured when-empty policy, and natural
//! upstream completion is a graceful terminal state: every current and
//! future subscriber's stream simply ends, which is distinct from an
//! error and distinct from cancellation.
//!
//! Two variants share the machinery:
//!
//! - [`SharedChannel`] replays nothing by default, but can be given a
//!   replay function whose value is delivered to each new subscriber
//!   before live events; that is how a late subscriber is handed a full
//!   snapshot before seeing increments.
//! - [`StateChannel`] owns a current value and replays the latest value
//!   to every new subscriber (last value wins).

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures::StreamExt;
use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
use futures::stream::{BoxStream, FusedStream, Stream};
use log::debug;

use crate::dataflow::task::TaskHandle;

/// Policy applied when the subscriber count drops back to zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum WhenEmpty {
    /// Keep the upstream running; future subscribers join mid-stream.
    #[default]
    Keep,
    /// Cancel the upstream and terminate permanently; future
    /// subscribers observe an immediately ended stream.
    Close,
    /// Cancel the upstream, but transparently re-activate it when a new
    /// subscriber arrives.
    Repeat,
}

#[derive(Clone, Debug, Default)]
pub struct MulticastOptions {
    /// Panics when a subscription would exceed this count; exceeding a
    /// cap is a programmer error, not a runtime condition.
    pub subscriber_cap: Option<usize>,
    pub when_empty: WhenEmpty,
}

type Factory<T> = dyn Fn() -> BoxStream<'static, T> + Send + Sync;
type ReplayFn<T> = dyn Fn() -> Option<T> + Send + Sync;

struct Slot<T> {
    id: u64,
    sender: UnboundedSender<T>,
}

struct Hub<T> {
    subscribers: Vec<Slot<T>>,
    next_id: u64,
    upstream_task: Option<TaskHandle>,
    upstream_active: bool,
    closed: bool,
}

impl<T> Hub<T> {
    fn new() -> Self {
        Self {
            subscribers: Vec::new(),
            next_id: 0,
            upstream_task: None,
            upstream_active: false,
            closed: false,
        }
    }
}

fn broadcast<T: Clone>(hub: &Arc<Mutex<Hub<T>>>, value: T) {
    // Snapshot-then-iterate: subscribers may come and go while we send.
    let senders: Vec<UnboundedSender<T>> = {
        let hub = hub.lock().expect("multicast registry poisoned");
        if hub.closed {
            return;
        }
        hub.subscribers.iter().map(|slot| slot.sender.clone()).collect()
    };
    for sender in senders {
        let _ = sender.unbounded_send(value.clone());
    }
}

fn spawn_forwarder<T: Clone + Send + 'static>(
    hub: Arc<Mutex<Hub<T>>>,
    mut upstream: BoxStream<'static, T>,
    latest: Option<Arc<Mutex<T>>>,
) -> TaskHandle {
    TaskHandle::spawn(async move {
        while let Some(value) = upstream.next().await {
            if let Some(latest) = &latest {
                *latest.lock().expect("multicast value poisoned") = value.clone();
            }
            broadcast(&hub, value);
        }
        // Natural completion: terminal close, every subscriber's stream
        // ends after draining what was already delivered.
        let mut hub = hub.lock().expect("multicast registry poisoned");
        hub.closed = true;
        hub.subscribers.clear();
    })
}

fn close_hub<T>(hub: &Arc<Mutex<Hub<T>>>) {
    let task = {
        let mut hub = hub.lock().expect("multicast registry poisoned");
        hub.closed = true;
        hub.subscribers.clear();
        hub.upstream_task.take()
    };
    if let Some(task) = task {
        task.abort();
    }
}

// Registers a subscriber under the hub lock; `seed` produces the value
// (if any) delivered ahead of live events. Returns the subscription and
// whether the caller must activate the upstream.
fn register<T: Clone>(
    hub: &Arc<Mutex<Hub<T>>>,
    options: &MulticastOptions,
    wants_upstream: bool,
    seed: impl FnOnce() -> Option<T>,
) -> (Subscription<T>, bool) {
    let mut locked = hub.lock().expect("multicast registry poisoned");

    if locked.closed {
        // Terminally closed: hand out a stream that ends immediately.
        let (sender, receiver) = unbounded();
        drop(sender);
        let subscription = Subscription {
            id: u64::MAX,
            receiver,
            hub: Arc::clone(hub),
            when_empty: options.when_empty,
        };
        return (subscription, false);
    }

    if let Some(cap) = options.subscriber_cap {
        assert!(
            locked.subscribers.len() < cap,
            "multicast subscriber cap ({cap}) exceeded"
        );
    }

    let (sender, receiver) = unbounded();
    if let Some(value) = seed() {
        let _ = sender.unbounded_send(value);
    }
    let id = locked.next_id;
    locked.next_id += 1;
    locked.subscribers.push(Slot { id, sender });

    let needs_activation = wants_upstream && !locked.upstream_active;
    if needs_activation {
        locked.upstream_active = true;
    }

    let subscription = Subscription {
        id,
        receiver,
        hub: Arc::clone(hub),
        when_empty: options.when_empty,
    };
    (subscription, needs_activation)
}

/// One subscriber's view of a multicast channel. The stream ends when
/// the channel closes (upstream completion or owner teardown); dropping
/// the subscription unregisters it and applies the when-empty policy.
pub struct Subscription<T> {
    id: u64,
    receiver: UnboundedReceiver<T>,
    hub: Arc<Mutex<Hub<T>>>,
    when_empty: WhenEmpty,
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("when_empty", &self.when_empty)
            .finish()
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        Pin::new(&mut self.receiver).poll_next(cx)
    }
}

impl<T> FusedStream for Subscription<T> {
    fn is_terminated(&self) -> bool {
        self.receiver.is_terminated()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        let task = {
            let mut hub = self.hub.lock().expect("multicast registry poisoned");
            if hub.closed {
                return;
            }
            hub.subscribers.retain(|slot| slot.id != self.id);
            if !hub.subscribers.is_empty() {
                return;
            }
            match self.when_empty {
                WhenEmpty::Keep => return,
                WhenEmpty::Close => {
                    debug!("last subscriber left, closing multicast channel");
                    hub.closed = true;
                    hub.upstream_task.take()
                }
                WhenEmpty::Repeat => {
                    debug!("last subscriber left, parking multicast upstream");
                    hub.upstream_active = false;
                    hub.upstream_task.take()
                }
            }
        };
        if let Some(task) = task {
            task.abort();
        }
    }
}

// Debug for Hub so Subscription's derive holds together.
impl<T> std::fmt::Debug for Hub<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("subscribers", &self.subscribers.len())
            .field("upstream_active", &self.upstream_active)
            .field("closed", &self.closed)
            .finish()
    }
}

/// Variant A: re-collectible broadcast over a single-collect upstream.
pub struct SharedChannel<T> {
    hub: Arc<Mutex<Hub<T>>>,
    factory: Arc<Factory<T>>,
    replay: Option<Arc<ReplayFn<T>>>,
    options: MulticastOptions,
}

impl<T: Clone + Send + 'static> SharedChannel<T> {
    /// Wraps an upstream. The factory is invoked lazily on the first
    /// subscription, and again after each re-activation under
    /// [`WhenEmpty::Repeat`]; a factory wrapping a single-collect source
    /// should panic on the second invocation it cannot serve.
    pub fn new<F>(factory: F, options: MulticastOptions) -> Self
    where
        F: Fn() -> BoxStream<'static, T> + Send + Sync + 'static,
    {
        Self {
            hub: Arc::new(Mutex::new(Hub::new())),
            factory: Arc::new(factory),
            replay: None,
            options,
        }
    }

    /// Installs a replay function: its value (when `Some`) is delivered
    /// to each new subscriber before any live event. The function must
    /// not call back into this channel.
    pub fn with_replay<F>(mut self, replay: F) -> Self
    where
        F: Fn() -> Option<T> + Send + Sync + 'static,
    {
        self.replay = Some(Arc::new(replay));
        self
    }

    pub fn subscribe(&self) -> Subscription<T> {
        let (subscription, needs_activation) =
            register(&self.hub, &self.options, true, || {
                self.replay.as_ref().and_then(|replay| replay())
            });
        if needs_activation {
            let upstream = (self.factory)();
            let task = spawn_forwarder(Arc::clone(&self.hub), upstream, None);
            self.hub
                .lock()
                .expect("multicast registry poisoned")
                .upstream_task = Some(task);
        }
        subscription
    }
}

impl<T> SharedChannel<T> {
    pub fn subscriber_count(&self) -> usize {
        self.hub
            .lock()
            .expect("multicast registry poisoned")
            .subscribers
            .len()
    }

    /// Terminates the channel: cancels the upstream and immediately ends
    /// every current and future subscriber's stream. Idempotent; always
    /// wins over the when-empty policy.
    pub fn close(&self) {
        close_hub(&self.hub);
    }
}

impl<T> Drop for SharedChannel<T> {
    fn drop(&mut self) {
        close_hub(&self.hub);
    }
}

/// Variant B: holds a current value and replays the latest value to
/// every new subscriber.
pub struct StateChannel<T> {
    hub: Arc<Mutex<Hub<T>>>,
    value: Arc<Mutex<T>>,
    factory: Option<Arc<Factory<T>>>,
    options: MulticastOptions,
}

impl<T: Clone + Send + 'static> StateChannel<T> {
    /// A producer-set state channel: values come from [`StateChannel::set`].
    pub fn new(initial: T) -> Self {
        Self {
            hub: Arc::new(Mutex::new(Hub::new())),
            value: Arc::new(Mutex::new(initial)),
            factory: None,
            options: MulticastOptions::default(),
        }
    }

    /// A state channel driven by an upstream, with the same lazy
    /// activation and when-empty behavior as [`SharedChannel`].
    pub fn from_stream<F>(initial: T, factory: F, options: MulticastOptions) -> Self
    where
        F: Fn() -> BoxStream<'static, T> + Send + Sync + 'static,
    {
        Self {
            hub: Arc::new(Mutex::new(Hub::new())),
            value: Arc::new(Mutex::new(initial)),
            factory: Some(Arc::new(factory)),
            options,
        }
    }

    /// Synchronous access to the latest value, for command-path guards.
    pub fn get_cloned(&self) -> T {
        self.value.lock().expect("multicast value poisoned").clone()
    }

    /// Replaces the value and broadcasts it.
    pub fn set(&self, value: T) {
        *self.value.lock().expect("multicast value poisoned") = value.clone();
        broadcast(&self.hub, value);
    }

    /// Replaces and broadcasts only when the value actually changed.
    pub fn set_neq(&self, value: T)
    where
        T: PartialEq,
    {
        {
            let mut current = self.value.lock().expect("multicast value poisoned");
            if *current == value {
                return;
            }
            *current = value.clone();
        }
        broadcast(&self.hub, value);
    }

    /// Subscribes; the latest value is delivered first.
    pub fn subscribe(&self) -> Subscription<T> {
        let (subscription, needs_activation) =
            register(&self.hub, &self.options, self.factory.is_some(), || {
                Some(self.value.lock().expect("multicast value poisoned").clone())
            });
        if needs_activation {
            let factory = self.factory.as_ref().expect("activation without factory");
            let upstream = factory();
            let task =
                spawn_forwarder(Arc::clone(&self.hub), upstream, Some(Arc::clone(&self.value)));
            self.hub
                .lock()
                .expect("multicast registry poisoned")
                .upstream_task = Some(task);
        }
        subscription
    }
}

impl<T> StateChannel<T> {
    pub fn subscriber_count(&self) -> usize {
        self.hub
            .lock()
            .expect("multicast registry poisoned")
            .subscribers
            .len()
    }

    /// See [`SharedChannel::close`].
    pub fn close(&self) {
        close_hub(&self.hub);
    }
}

impl<T> Drop for StateChannel<T> {
    fn drop(&mut self) {
        close_hub(&self.hub);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    // Factory that counts activations and yields from a fresh channel
    // per activation, fed by the returned feeder.
    fn counting_factory(
        counter: Arc<AtomicUsize>,
        feeder: Arc<Mutex<Option<mpsc::UnboundedSender<u32>>>>,
    ) -> impl Fn() -> BoxStream<'static, u32> + Send + Sync + 'static {
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::unbounded();
            *feeder.lock().unwrap() = Some(tx);
            rx.boxed()
        }
    }

    #[tokio::test]
    async fn upstream_activates_lazily_and_forwards() {
        let counter = Arc::new(AtomicUsize::new(0));
        let feeder = Arc::new(Mutex::new(None));
        let channel = SharedChannel::new(
            counting_factory(Arc::clone(&counter), Arc::clone(&feeder)),
            MulticastOptions::default(),
        );

        assert_eq!(counter.load(Ordering::SeqCst), 0);

        let mut a = channel.subscribe();
        let mut b = channel.subscribe();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(channel.subscriber_count(), 2);

        tokio::time::sleep(Duration::from_millis(10)).await;
        feeder.lock().unwrap().as_ref().unwrap().unbounded_send(7).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(a.next().await, Some(7));
        assert_eq!(b.next().await, Some(7));
    }

    #[tokio::test]
    async fn close_policy_is_terminal() {
        let counter = Arc::new(AtomicUsize::new(0));
        let feeder = Arc::new(Mutex::new(None));
        let channel = SharedChannel::new(
            counting_factory(Arc::clone(&counter), Arc::clone(&feeder)),
            MulticastOptions { subscriber_cap: None, when_empty: WhenEmpty::Close },
        );

        let first = channel.subscribe();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        drop(first);

        // Subscriber count returned to zero: permanently closed.
        let mut late = channel.subscribe();
        assert_eq!(late.next().await, None);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn repeat_policy_reactivates_per_cycle() {
        let counter = Arc::new(AtomicUsize::new(0));
        let feeder = Arc::new(Mutex::new(None));
        let channel = SharedChannel::new(
            counting_factory(Arc::clone(&counter), Arc::clone(&feeder)),
            MulticastOptions { subscriber_cap: None, when_empty: WhenEmpty::Repeat },
        );

        let first = channel.subscribe();
        drop(first);
        let second = channel.subscribe();
        drop(second);

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn natural_completion_ends_all_subscribers_gracefully() {
        let channel = SharedChannel::new(
            || futures::stream::iter(vec![1, 2]).boxed(),
            MulticastOptions::default(),
        );

        let mut sub = channel.subscribe();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(sub.next().await, Some(1));
        assert_eq!(sub.next().await, Some(2));
        assert_eq!(sub.next().await, None);

        // Terminal: later subscribers end immediately, upstream is not
        // re-invoked even though the stream could be rebuilt.
        let mut late = channel.subscribe();
        assert_eq!(late.next().await, None);
    }

    #[tokio::test]
    #[should_panic(expected = "subscriber cap")]
    async fn exceeding_the_cap_panics() {
        let channel: SharedChannel<u32> = SharedChannel::new(
            || futures::stream::pending().boxed(),
            MulticastOptions { subscriber_cap: Some(1), when_empty: WhenEmpty::Keep },
        );
        let _first = channel.subscribe();
        let _second = channel.subscribe();
    }

    #[tokio::test]
    async fn replay_runs_before_live_events() {
        let feeder = Arc::new(Mutex::new(None));
        let counter = Arc::new(AtomicUsize::new(0));
        let channel = SharedChannel::new(
            counting_factory(counter, Arc::clone(&feeder)),
            MulticastOptions::default(),
        )
        .with_replay(|| Some(99));

        let mut sub = channel.subscribe();
        tokio::time::sleep(Duration::from_millis(10)).await;
        feeder.lock().unwrap().as_ref().unwrap().unbounded_send(1).unwrap();

        assert_eq!(sub.next().await, Some(99));
        assert_eq!(sub.next().await, Some(1));
    }

    #[tokio::test]
    async fn state_channel_replays_the_latest_value() {
        let channel = StateChannel::new(1);
        channel.set(2);
        channel.set(3);

        let mut sub = channel.subscribe();
        assert_eq!(channel.subscriber_count(), 1);
        assert_eq!(sub.next().await, Some(3));

        channel.set(4);
        assert_eq!(sub.next().await, Some(4));
        assert_eq!(channel.get_cloned(), 4);
    }

    #[tokio::test]
    async fn set_neq_suppresses_redundant_broadcasts() {
        let channel = StateChannel::new(5);
        let mut sub = channel.subscribe();
        assert_eq!(sub.next().await, Some(5));

        channel.set_neq(5);
        channel.set_neq(6);
        assert_eq!(sub.next().await, Some(6));
    }

    #[tokio::test]
    async fn upstream_driven_state_channel_tracks_latest() {
        let channel = StateChannel::from_stream(
            0,
            || futures::stream::iter(vec![10, 20]).boxed(),
            MulticastOptions::default(),
        );

        let mut first = channel.subscribe();
        assert_eq!(first.next().await, Some(0));
        assert_eq!(first.next().await, Some(10));
        assert_eq!(first.next().await, Some(20));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(channel.get_cloned(), 20);
    }

    #[tokio::test]
    async fn closing_the_owner_ends_subscribers() {
        let channel = StateChannel::new(1);
        let mut sub = channel.subscribe();
        assert_eq!(sub.next().await, Some(1));

        channel.close();
        assert_eq!(sub.next().await, None);

        let mut late = channel.subscribe();
        assert_eq!(late.next().await, None);
    }
}
