//! Paging and incremental list synchronization engine.
//!
//! pagewave fetches pages from an injected data source under an
//! at-most-one-in-flight-per-axis discipline, reconciles the producer-
//! side list holder with any number of consumer-side render lists
//! through version-stamped update operations, and multicasts the
//! reconciled stream to subscribers whose lifetime is shorter than the
//! fetch lifetime. Rendering, layout and the data source itself stay
//! outside: the render surface feeds visibility reports and
//! refresh/append/retry commands in, and consumes ordered update
//! operations and load state changes out.
//!
//! # Layers
//!
//! - [`dataflow`] - relays, multicast hot channels, task handles; no
//!   paging semantics.
//! - [`load_state`], [`source`], [`config`], [`error`] - the paging
//!   vocabulary.
//! - [`fetcher`] - the per-epoch load sequencer.
//! - [`collection`], [`events`], [`sync`] - versioned list state and the
//!   optimistic merge protocol between its owners.
//! - [`diff`], [`updater`] - consumer-side diffing and the serialized,
//!   cancellable update queue.
//! - [`pager`], [`prefetch`] - the facade the host application talks to.

pub mod collection;
pub mod config;
pub mod dataflow;
pub mod diff;
pub mod error;
pub mod events;
pub mod fetcher;
pub mod load_state;
pub mod pager;
pub mod prefetch;
pub mod source;
pub mod sync;
pub mod updater;

pub use collection::{UpdateOp, VersionedList};
pub use config::PagingConfig;
pub use dataflow::multicast::{MulticastOptions, SharedChannel, StateChannel, Subscription, WhenEmpty};
pub use dataflow::relay::{Relay, SignalRelay};
pub use diff::{DiffItem, ListEdit, diff_lists};
pub use error::LoadError;
pub use events::{PagingEvent, Stamped};
pub use fetcher::PageFetcher;
pub use load_state::{LoadState, LoadStates, should_scroll_to_start};
pub use pager::Pager;
pub use prefetch::Prefetcher;
pub use source::{LoadParams, LoadResult, LoadType, PageSource};
pub use sync::{ListSynchronizer, SyncSubscription};
pub use updater::{ListUpdater, UpdateCanceled, UpdateOutcome, UpdateTicket};
