//! Load state machine for the two paging axes.
//!
//! Each axis (refresh, append) walks `Incomplete → Loading → Success |
//! Failure`; a failed or partially loaded axis can re-enter `Loading`
//! through retry or append, and `Success { is_fully: true }` is terminal
//! until the next refresh epoch resets both axes. `LoadStates` is a
//! copy-on-write value: the fetcher replaces it wholesale on every
//! transition, and everything derived from it is computed, never stored.

use crate::config::PagingConfig;
use crate::error::LoadError;

/// State of a single load axis.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadState {
    /// No load has happened on this axis in the current epoch.
    Incomplete,
    /// A load is in flight.
    Loading,
    /// The last load finished; `is_fully` means the source reported no
    /// further key, so this axis has nothing left to fetch.
    Success { is_fully: bool },
    /// The last load failed; retry is the only way forward.
    Failure { error: LoadError },
}

impl LoadState {
    pub fn is_loading(&self) -> bool {
        matches!(self, LoadState::Loading)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, LoadState::Success { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, LoadState::Failure { .. })
    }

    pub fn is_fully(&self) -> bool {
        matches!(self, LoadState::Success { is_fully: true })
    }

    pub fn error(&self) -> Option<&LoadError> {
        match self {
            LoadState::Failure { error } => Some(error),
            _ => None,
        }
    }
}

/// Snapshot of both axes, replaced (never mutated) on every transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadStates {
    pub refresh: LoadState,
    pub append: LoadState,
}

impl LoadStates {
    /// The state every new epoch starts from.
    pub const INITIAL: LoadStates = LoadStates {
        refresh: LoadState::Incomplete,
        append: LoadState::Incomplete,
    };

    /// Whether an append request may start a load right now: the refresh
    /// axis must have succeeded without exhausting the source, and the
    /// append axis must be neither in flight nor exhausted. Callers may
    /// race requests against transitions; a request that fails this
    /// guard is dropped, never an error.
    pub fn is_allow_append(&self) -> bool {
        self.refresh.is_success()
            && !self.refresh.is_fully()
            && !self.append.is_loading()
            && !self.append.is_fully()
    }

    /// Whether the source is exhausted on either axis.
    pub fn is_fully(&self) -> bool {
        self.refresh.is_fully() || self.append.is_fully()
    }

    /// First failure on either axis, refresh taking precedence.
    pub fn error(&self) -> Option<&LoadError> {
        self.refresh.error().or_else(|| self.append.error())
    }

    /// Neither axis is in flight.
    pub fn is_idle(&self) -> bool {
        !self.refresh.is_loading() && !self.append.is_loading()
    }

    pub fn with_refresh(&self, refresh: LoadState) -> Self {
        LoadStates {
            refresh,
            append: self.append.clone(),
        }
    }

    pub fn with_append(&self, append: LoadState) -> Self {
        LoadStates {
            refresh: self.refresh.clone(),
            append,
        }
    }

    // ===== EDGE DETECTORS =====
    //
    // Pure functions over (previous, current) used by consumers to fire
    // side effects exactly once per transition. Each is true only on the
    // edge itself, not while the state merely remains in the target.

    /// A refresh load just started.
    pub fn refresh_started(previous: &LoadStates, current: &LoadStates) -> bool {
        !previous.refresh.is_loading() && current.refresh.is_loading()
    }

    /// A refresh load just finished successfully.
    pub fn refresh_finished(previous: &LoadStates, current: &LoadStates) -> bool {
        previous.refresh.is_loading() && current.refresh.is_success()
    }

    /// The append axis just entered failure.
    pub fn append_failed(previous: &LoadStates, current: &LoadStates) -> bool {
        !previous.append.is_failure() && current.append.is_failure()
    }

    /// The source just became exhausted.
    pub fn became_fully_loaded(previous: &LoadStates, current: &LoadStates) -> bool {
        !previous.is_fully() && current.is_fully()
    }
}

impl Default for LoadStates {
    fn default() -> Self {
        LoadStates::INITIAL
    }
}

/// Render-surface helper: whether this transition should scroll the
/// surface back to the start, per the `refresh_scrolls_to_start` option.
pub fn should_scroll_to_start(
    previous: &LoadStates,
    current: &LoadStates,
    config: &PagingConfig,
) -> bool {
    config.refresh_scrolls_to_start && LoadStates::refresh_started(previous, current)
}
