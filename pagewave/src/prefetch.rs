//! Visibility-driven append triggering.
//!
//! The render surface owns scrolling and only reports what became
//! visible; this adapter turns those reports into append commands once
//! the viewport comes within the configured distance of the end. All
//! command-side: it holds no list state of its own.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;

use crate::pager::Pager;

pub struct Prefetcher<T, K> {
    pager: Arc<Pager<T, K>>,
    distance: Option<usize>,
    attached: AtomicBool,
}

impl<T, K> Prefetcher<T, K>
where
    T: Clone + Send + Sync + 'static,
    K: Clone + Send + Sync + 'static,
{
    pub fn new(pager: Arc<Pager<T, K>>) -> Self {
        let distance = pager.config().append_prefetch_distance;
        Self {
            pager,
            distance,
            attached: AtomicBool::new(true),
        }
    }

    /// The surface is back on screen; visibility reports count again.
    pub fn attach(&self) {
        self.attached.store(true, Ordering::SeqCst);
    }

    /// The surface went away; visibility reports are ignored until
    /// [`Prefetcher::attach`].
    pub fn detach(&self) {
        self.attached.store(false, Ordering::SeqCst);
    }

    /// Report from the render surface that items
    /// `first_visible..=last_visible` of `total` are on screen. Requests
    /// an append when the end of the list is within the prefetch
    /// distance and appending is currently allowed.
    pub fn visible_range(&self, _first_visible: usize, last_visible: usize, total: usize) {
        if !self.attached.load(Ordering::SeqCst) || total == 0 {
            return;
        }
        let Some(distance) = self.distance else {
            return;
        };
        let remaining = total.saturating_sub(last_visible + 1);
        if remaining > distance {
            return;
        }
        if !self.pager.current_states().is_allow_append() {
            return;
        }
        debug!("prefetch: {remaining} items from the end, requesting append");
        self.pager.append();
    }
}
