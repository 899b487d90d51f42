//! Events flowing from the engine to its consumers.

use crate::collection::UpdateOp;
use crate::load_state::LoadStates;
use crate::source::LoadType;

/// One engine-to-consumer notification. Every variant carries the load
/// state snapshot taken when the event was produced, so consumers never
/// have to join two streams to decorate the list.
#[derive(Clone, Debug)]
pub enum PagingEvent<T> {
    /// A load transitioned on one axis.
    LoadStateUpdate { load_type: LoadType, states: LoadStates },
    /// A load produced a page of items. Emitted by the fetcher; the
    /// synchronizer translates it into a `ListUpdate` before broadcast.
    DataSuccess { items: Vec<T>, load_type: LoadType, states: LoadStates },
    /// A structural edit to the list.
    ListUpdate { op: UpdateOp<T>, states: LoadStates },
}

/// A `PagingEvent` stamped with the producer's post-apply version.
///
/// Within one synchronizer, stamps observed by any subscriber are
/// non-decreasing; a subscriber discards any list update whose version
/// is at or below the last one it applied, which makes replay
/// idempotent and breaks producer/consumer echo loops.
#[derive(Clone, Debug)]
pub struct Stamped<T> {
    pub version: u64,
    pub event: PagingEvent<T>,
}
