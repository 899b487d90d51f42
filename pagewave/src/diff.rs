//! Edit-script computation between two list snapshots.
//!
//! Items are compared on three tiers: identity (is this the same logical
//! item), content (does it render the same), and an optional change
//! payload describing what changed. The script transforms the old
//! snapshot into the new one when its edits are applied in order, which
//! is exactly how a render surface consumes them.

use log::trace;

/// Item comparison contract for diffing.
pub trait DiffItem: Clone + Send + Sync + 'static {
    /// What [`DiffItem::change_payload`] describes a content change with.
    type Payload: Clone + Send + Sync + 'static;

    /// Whether `self` and `other` are the same logical item (e.g. share
    /// an id), regardless of content.
    fn same_identity(&self, other: &Self) -> bool;

    /// Whether the same logical item also renders identically.
    fn same_content(&self, other: &Self) -> bool;

    /// Optional description of the content change from `self` (the old
    /// item) to `other` (the new one); `None` means "rebind everything".
    fn change_payload(&self, _other: &Self) -> Option<Self::Payload> {
        None
    }
}

/// One granular notification for the render surface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListEdit<P> {
    Inserted { pos: usize, count: usize },
    Removed { pos: usize, count: usize },
    Changed { pos: usize, payload: Option<P> },
    Moved { from: usize, to: usize },
}

/// Computes the edit script turning `old` into `new`.
///
/// Structure first (removals, then moves/inserts walking the target
/// positions), content changes last at their final positions. A removed
/// item whose identity reappears among the insertions is reported as
/// `Moved` instead of a remove/insert pair.
pub fn diff_lists<T: DiffItem>(old: &[T], new: &[T]) -> Vec<ListEdit<T::Payload>> {
    let n = old.len();
    let m = new.len();

    // Trivial shapes skip the matching entirely.
    if n == 0 && m == 0 {
        return Vec::new();
    }
    if n == 0 {
        return vec![ListEdit::Inserted { pos: 0, count: m }];
    }
    if m == 0 {
        return vec![ListEdit::Removed { pos: 0, count: n }];
    }

    let (match_old, match_new) = longest_common_matches(old, new);

    // Pair leftover removals with leftover insertions of the same
    // identity: those are moves, not churn.
    let mut move_old: Vec<Option<usize>> = vec![None; n];
    let mut move_new: Vec<Option<usize>> = vec![None; m];
    let unmatched_new: Vec<usize> = (0..m).filter(|&j| match_new[j].is_none()).collect();
    let mut paired = vec![false; unmatched_new.len()];
    for i in (0..n).filter(|&i| match_old[i].is_none()) {
        for (k, &j) in unmatched_new.iter().enumerate() {
            if !paired[k] && old[i].same_identity(&new[j]) {
                paired[k] = true;
                move_old[i] = Some(j);
                move_new[j] = Some(i);
                break;
            }
        }
    }

    // Replay the transformation over a working copy of positions; every
    // edit is emitted against the list shape at that point, so applying
    // the script in order is always in range. `Some(i)` is the surviving
    // old item `i`, `None` a freshly inserted one.
    let mut work: Vec<Option<usize>> = (0..n).map(Some).collect();
    let mut edits: Vec<ListEdit<T::Payload>> = Vec::new();
    let mut changes: Vec<(usize, Option<T::Payload>)> = Vec::new();

    for i in (0..n).rev() {
        if match_old[i].is_none() && move_old[i].is_none() {
            let pos = position_of(&work, i);
            work.remove(pos);
            edits.push(ListEdit::Removed { pos, count: 1 });
        }
    }

    for (j, new_item) in new.iter().enumerate() {
        let surviving = match_new[j].or(move_new[j]);
        match surviving {
            Some(i) => {
                let pos = position_of(&work, i);
                if pos != j {
                    let entry = work.remove(pos);
                    work.insert(j, entry);
                    edits.push(ListEdit::Moved { from: pos, to: j });
                }
                if !old[i].same_content(new_item) {
                    changes.push((j, old[i].change_payload(new_item)));
                }
            }
            None => {
                work.insert(j, None);
                edits.push(ListEdit::Inserted { pos: j, count: 1 });
            }
        }
    }
    debug_assert_eq!(work.len(), m);

    let mut edits = coalesce(edits);
    for (pos, payload) in changes {
        edits.push(ListEdit::Changed { pos, payload });
    }
    trace!("diffed {n} -> {m} items into {} edits", edits.len());
    edits
}

// Longest common subsequence over item identity; returns the old->new
// and new->old match maps.
fn longest_common_matches<T: DiffItem>(
    old: &[T],
    new: &[T],
) -> (Vec<Option<usize>>, Vec<Option<usize>>) {
    let n = old.len();
    let m = new.len();
    // lengths[i][j] = LCS length of old[i..] vs new[j..], flattened.
    let width = m + 1;
    let mut lengths = vec![0usize; (n + 1) * width];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lengths[i * width + j] = if old[i].same_identity(&new[j]) {
                lengths[(i + 1) * width + j + 1] + 1
            } else {
                lengths[(i + 1) * width + j].max(lengths[i * width + j + 1])
            };
        }
    }

    let mut match_old: Vec<Option<usize>> = vec![None; n];
    let mut match_new: Vec<Option<usize>> = vec![None; m];
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old[i].same_identity(&new[j]) {
            match_old[i] = Some(j);
            match_new[j] = Some(i);
            i += 1;
            j += 1;
        } else if lengths[(i + 1) * width + j] >= lengths[i * width + j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }
    (match_old, match_new)
}

fn position_of(work: &[Option<usize>], old_index: usize) -> usize {
    work.iter()
        .position(|&entry| entry == Some(old_index))
        .expect("surviving item missing from working copy")
}

// Merges runs of adjacent single-item inserts/removes into ranged edits.
fn coalesce<P>(edits: Vec<ListEdit<P>>) -> Vec<ListEdit<P>> {
    let mut out: Vec<ListEdit<P>> = Vec::new();
    for edit in edits {
        match (out.last_mut(), &edit) {
            (
                Some(ListEdit::Removed { pos: prev_pos, count: prev_count }),
                ListEdit::Removed { pos, count },
            ) if pos + count == *prev_pos => {
                *prev_pos = *pos;
                *prev_count += count;
            }
            (
                Some(ListEdit::Inserted { pos: prev_pos, count: prev_count }),
                ListEdit::Inserted { pos, count },
            ) if *pos == *prev_pos + *prev_count => {
                *prev_count += count;
            }
            _ => out.push(edit),
        }
    }
    out
}
