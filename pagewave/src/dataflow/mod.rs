//! Reactive primitives the paging engine is built from.
//!
//! These components carry no paging semantics of their own:
//!
//! - **[`Relay`]** / **[`SignalRelay`]** - channel-backed event pipes;
//!   the signal variant coalesces repeated raises into one wake-up.
//! - **[`SharedChannel`]** / **[`StateChannel`]** - multicast hot
//!   channels over a single-collect upstream, with lazy activation,
//!   reference-counted when-empty policies, and graceful terminal close.
//! - **[`TaskHandle`]** - abort-on-drop ownership of coordinator tasks.

pub mod multicast;
pub mod relay;
pub mod task;

pub use multicast::{MulticastOptions, SharedChannel, StateChannel, Subscription, WhenEmpty};
pub use relay::{Relay, RelayClosed, SignalRelay, SignalStream, relay};
pub use task::TaskHandle;
