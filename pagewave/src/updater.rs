//! Serialized, cancellable application of update operations.
//!
//! `ListUpdater` owns the consumer-side canonical list. Partial
//! operations (set/insert/remove/move) apply synchronously while nothing
//! else is running; `ReplaceAll` diffs the old and new snapshots off the
//! coordinating context and commits the result only if it is still the
//! newest submission. Operations are serialized through a single-slot
//! run queue: one runs, at most one waits, and a newer submission
//! displaces the waiting one.

use std::sync::{Arc, Mutex};

use futures::channel::mpsc::UnboundedReceiver;
use futures::channel::oneshot;
use log::{debug, warn};
use thiserror::Error;

use crate::collection::UpdateOp;
use crate::dataflow::relay::{Relay, relay};
use crate::diff::{DiffItem, ListEdit, diff_lists};

/// How a submitted operation ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The operation mutated the committed list (or was an in-range
    /// no-op).
    Applied,
    /// The operation was superseded by a newer submission or the engine
    /// was cancelled before it ran.
    Discarded,
}

/// The updater was dropped while a caller was still awaiting this
/// operation; the operation itself may still finish independently.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("list updater went away before the operation completed")]
pub struct UpdateCanceled;

/// Completion signal for one submitted operation.
pub struct UpdateTicket {
    receiver: oneshot::Receiver<UpdateOutcome>,
}

impl UpdateTicket {
    pub async fn wait(self) -> Result<UpdateOutcome, UpdateCanceled> {
        self.receiver.await.map_err(|_| UpdateCanceled)
    }
}

struct Queued<T: DiffItem> {
    op: UpdateOp<T>,
    seq: u64,
    done: oneshot::Sender<UpdateOutcome>,
}

struct Inner<T: DiffItem> {
    committed: Arc<Vec<T>>,
    /// Bumped per `ReplaceAll` submission; a finishing diff whose seq no
    /// longer matches was superseded and must not commit.
    replace_seq: u64,
    running: bool,
    cancelled: bool,
    pending: Option<Queued<T>>,
    edits: Relay<ListEdit<T::Payload>>,
}

/// Consumer-side list owner with an asynchronous diff path.
pub struct ListUpdater<T: DiffItem> {
    inner: Arc<Mutex<Inner<T>>>,
    edits_rx: Mutex<Option<UnboundedReceiver<ListEdit<T::Payload>>>>,
}

impl<T: DiffItem> ListUpdater<T> {
    pub fn new() -> Self {
        Self::from_items(Vec::new())
    }

    pub fn from_items(items: Vec<T>) -> Self {
        let (edits_tx, edits_rx) = relay();
        Self {
            inner: Arc::new(Mutex::new(Inner {
                committed: Arc::new(items),
                replace_seq: 0,
                running: false,
                cancelled: false,
                pending: None,
                edits: edits_tx,
            })),
            edits_rx: Mutex::new(Some(edits_rx)),
        }
    }

    /// The granular notification stream for the render surface. Single
    /// consumer; taking it twice is a programming error.
    pub fn edits(&self) -> UnboundedReceiver<ListEdit<T::Payload>> {
        self.edits_rx
            .lock()
            .expect("updater edit stream poisoned")
            .take()
            .unwrap_or_else(|| panic!("list updater edit stream already taken"))
    }

    /// Snapshot of the committed list.
    pub fn snapshot(&self) -> Arc<Vec<T>> {
        Arc::clone(&self.lock().committed)
    }

    pub fn len(&self) -> usize {
        self.lock().committed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().committed.is_empty()
    }

    /// Submits an operation. The ticket resolves once the operation is
    /// applied or discarded; awaiting it is optional.
    pub fn apply(&self, op: UpdateOp<T>) -> UpdateTicket {
        let (done, receiver) = oneshot::channel();
        let ticket = UpdateTicket { receiver };
        let mut inner = self.lock();

        if inner.cancelled {
            let _ = done.send(UpdateOutcome::Discarded);
            return ticket;
        }

        if inner.running {
            if matches!(op, UpdateOp::ReplaceAll(_)) {
                inner.replace_seq += 1;
            }
            let seq = inner.replace_seq;
            if let Some(displaced) = inner.pending.take() {
                debug!("displacing queued list operation with a newer one");
                let _ = displaced.done.send(UpdateOutcome::Discarded);
            }
            inner.pending = Some(Queued { op, seq, done });
            return ticket;
        }

        match op {
            UpdateOp::ReplaceAll(new) => {
                inner.replace_seq += 1;
                let seq = inner.replace_seq;
                if let Some(edits) = trivial_replace(&inner.committed, &new) {
                    commit(&mut inner, new, edits);
                    let _ = done.send(UpdateOutcome::Applied);
                } else {
                    inner.running = true;
                    drop(inner);
                    // Detached on purpose: cancellation must let a
                    // running diff finish without applying it.
                    tokio::spawn(run_replace(Arc::clone(&self.inner), new, seq, done));
                }
            }
            op => {
                apply_partial(&mut inner, &op);
                let _ = done.send(UpdateOutcome::Applied);
            }
        }
        ticket
    }

    /// Cancels the engine: the waiting slot is discarded, a running diff
    /// is detached (it completes but is not applied), and the committed
    /// list stays as it is. Safe to call repeatedly.
    pub fn cancel(&self) {
        let mut inner = self.lock();
        inner.cancelled = true;
        if let Some(queued) = inner.pending.take() {
            let _ = queued.done.send(UpdateOutcome::Discarded);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<T>> {
        self.inner.lock().expect("updater state poisoned")
    }
}

impl<T: DiffItem> Default for ListUpdater<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DiffItem> Drop for ListUpdater<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}

// Commits a replace and streams its edits.
fn commit<T: DiffItem>(inner: &mut Inner<T>, new: Arc<Vec<T>>, edits: Vec<ListEdit<T::Payload>>) {
    inner.committed = new;
    for edit in edits {
        inner.edits.send(edit);
    }
}

// Replace shapes that never need the diff algorithm.
fn trivial_replace<T: DiffItem>(
    old: &Arc<Vec<T>>,
    new: &Arc<Vec<T>>,
) -> Option<Vec<ListEdit<T::Payload>>> {
    if Arc::ptr_eq(old, new) {
        return Some(Vec::new());
    }
    match (old.is_empty(), new.is_empty()) {
        (true, true) => Some(Vec::new()),
        (true, false) => Some(vec![ListEdit::Inserted { pos: 0, count: new.len() }]),
        (false, true) => Some(vec![ListEdit::Removed { pos: 0, count: old.len() }]),
        (false, false) => None,
    }
}

// Synchronous path for position-addressed operations. Out-of-range
// operations are benign races and ignored.
fn apply_partial<T: DiffItem>(inner: &mut Inner<T>, op: &UpdateOp<T>) {
    let items = Arc::make_mut(&mut inner.committed);
    match op {
        UpdateOp::ReplaceAll(_) => unreachable!("replace-all never takes the partial path"),
        UpdateOp::SetRange { pos, items: new_items } => {
            match pos.checked_add(new_items.len()) {
                Some(end) if end <= items.len() => {
                    for (offset, new_item) in new_items.iter().enumerate() {
                        let target = &mut items[pos + offset];
                        if !target.same_content(new_item) {
                            let payload = target.change_payload(new_item);
                            inner.edits.send(ListEdit::Changed { pos: pos + offset, payload });
                        }
                        *target = new_item.clone();
                    }
                }
                _ => warn!("ignoring out-of-range set-range at {pos} (len {})", items.len()),
            }
        }
        UpdateOp::InsertRange { pos, items: new_items } => {
            if *pos <= items.len() {
                items.splice(*pos..*pos, new_items.iter().cloned());
                inner.edits.send(ListEdit::Inserted { pos: *pos, count: new_items.len() });
            } else {
                warn!("ignoring out-of-range insert at {pos} (len {})", items.len());
            }
        }
        UpdateOp::RemoveRange { pos, len } => {
            match pos.checked_add(*len) {
                Some(end) if end <= items.len() => {
                    items.drain(*pos..end);
                    inner.edits.send(ListEdit::Removed { pos: *pos, count: *len });
                }
                _ => warn!("ignoring out-of-range remove at {pos} (len {})", items.len()),
            }
        }
        UpdateOp::Move { from, to } => {
            if *from < items.len() && *to < items.len() {
                let item = items.remove(*from);
                items.insert(*to, item);
                inner.edits.send(ListEdit::Moved { from: *from, to: *to });
            } else {
                warn!("ignoring out-of-range move {from} -> {to} (len {})", items.len());
            }
        }
    }
}

// Runs replace-all submissions until the waiting slot is drained.
async fn run_replace<T: DiffItem>(
    inner: Arc<Mutex<Inner<T>>>,
    new: Arc<Vec<T>>,
    seq: u64,
    done: oneshot::Sender<UpdateOutcome>,
) {
    let mut job = Some((new, seq, done));
    while let Some((new, seq, done)) = job.take() {
        let old = {
            let locked = inner.lock().expect("updater state poisoned");
            Arc::clone(&locked.committed)
        };

        let edits = match trivial_replace(&old, &new) {
            Some(edits) => Some(edits),
            None => {
                let diff_old = Arc::clone(&old);
                let diff_new = Arc::clone(&new);
                tokio::task::spawn_blocking(move || diff_lists(&diff_old, &diff_new))
                    .await
                    .ok()
            }
        };

        let mut locked = inner.lock().expect("updater state poisoned");
        let stale = locked.cancelled || seq != locked.replace_seq;
        match edits {
            Some(edits) if !stale => {
                commit(&mut locked, new, edits);
                let _ = done.send(UpdateOutcome::Applied);
            }
            _ => {
                let _ = done.send(UpdateOutcome::Discarded);
            }
        }

        match locked.pending.take() {
            Some(queued) => match queued.op {
                UpdateOp::ReplaceAll(next) => {
                    job = Some((next, queued.seq, queued.done));
                }
                op => {
                    if locked.cancelled {
                        let _ = queued.done.send(UpdateOutcome::Discarded);
                    } else {
                        apply_partial(&mut locked, &op);
                        let _ = queued.done.send(UpdateOutcome::Applied);
                    }
                    locked.running = false;
                }
            },
            None => {
                locked.running = false;
            }
        }
    }
}
