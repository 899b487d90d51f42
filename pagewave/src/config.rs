//! Recognized paging options.
//!
//! The config is a plain serde value so host applications can persist it
//! next to their own settings; every field has a default, so partial
//! documents deserialize cleanly.

use serde::{Deserialize, Serialize};

use crate::source::LoadType;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct PagingConfig {
    /// Items requested per append load.
    pub page_size: usize,
    /// Items requested by the initial refresh load; usually a multiple
    /// of `page_size` so the first screenful overfills the viewport.
    pub initial_page_size: usize,
    /// When the source returns an empty page with a next key, silently
    /// advance to that key and fetch again instead of failing the axis.
    pub load_result_empty_fetch_next: bool,
    /// Treat an append request while the append axis is failed as an
    /// implicit retry instead of dropping it.
    pub append_failure_auto_retry: bool,
    /// Distance from the end of the list at which visibility reports
    /// trigger an append; `None` disables visibility-driven appends.
    pub append_prefetch_distance: Option<usize>,
    /// Whether a refresh transition should scroll the render surface
    /// back to the start.
    pub refresh_scrolls_to_start: bool,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            page_size: 20,
            initial_page_size: 60,
            load_result_empty_fetch_next: true,
            append_failure_auto_retry: false,
            append_prefetch_distance: Some(3),
            refresh_scrolls_to_start: true,
        }
    }
}

impl PagingConfig {
    /// Page size for one load: refresh uses the initial size, append the
    /// steady-state size.
    pub fn page_size_for(&self, load_type: LoadType) -> usize {
        match load_type {
            LoadType::Refresh => self.initial_page_size,
            LoadType::Append => self.page_size,
        }
    }
}
