//! Ordered collection with structural operations and version stamping.
//!
//! `VersionedList` is one owner's view of "the current list": a plain
//! vector plus a monotonically increasing version counter that advances
//! on every applied operation. Two owners (the producer-side holder and
//! the consumer-side render list) never share this value; only
//! `UpdateOp`s and version numbers cross between them.

use std::sync::Arc;

use log::warn;

/// A granular structural edit to an ordered collection.
///
/// `ReplaceAll` carries its snapshot behind an `Arc` so fanning the op
/// out to many subscribers never deep-copies the list.
#[derive(Clone, Debug)]
pub enum UpdateOp<T> {
    ReplaceAll(Arc<Vec<T>>),
    SetRange { pos: usize, items: Vec<T> },
    InsertRange { pos: usize, items: Vec<T> },
    RemoveRange { pos: usize, len: usize },
    /// Detach the item at `from` and reinsert it so it ends up at `to`.
    Move { from: usize, to: usize },
}

/// An indexable, mutable sequence with a per-owner version counter.
#[derive(Debug, Default)]
pub struct VersionedList<T> {
    items: Vec<T>,
    version: u64,
}

impl<T: Clone> VersionedList<T> {
    pub fn new() -> Self {
        Self { items: Vec::new(), version: 0 }
    }

    pub fn from_items(items: Vec<T>) -> Self {
        Self { items, version: 0 }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Snapshot of the current items.
    pub fn snapshot(&self) -> Arc<Vec<T>> {
        Arc::new(self.items.clone())
    }

    /// Applies an operation and advances the version.
    ///
    /// Returns `false` (and leaves the version untouched) when the
    /// operation's indices are out of range for the current length.
    /// That case is a benign race between concurrent structural changes
    /// and a pending operation, so it is ignored rather than surfaced.
    pub fn apply(&mut self, op: &UpdateOp<T>) -> bool {
        let applied = self.apply_unversioned(op);
        if applied {
            self.version += 1;
        }
        applied
    }

    /// Applies an operation without advancing the version. Used when an
    /// operation already counted on the other side of the sync boundary
    /// is mirrored into this holder.
    pub fn apply_unversioned(&mut self, op: &UpdateOp<T>) -> bool {
        match op {
            UpdateOp::ReplaceAll(items) => {
                self.items = items.as_ref().clone();
                true
            }
            UpdateOp::SetRange { pos, items } => {
                match pos.checked_add(items.len()) {
                    Some(end) if end <= self.items.len() => {
                        for (offset, item) in items.iter().enumerate() {
                            self.items[pos + offset] = item.clone();
                        }
                        true
                    }
                    _ => self.ignore("set-range", *pos),
                }
            }
            UpdateOp::InsertRange { pos, items } => {
                if *pos <= self.items.len() {
                    self.items.splice(*pos..*pos, items.iter().cloned());
                    true
                } else {
                    self.ignore("insert-range", *pos)
                }
            }
            UpdateOp::RemoveRange { pos, len } => {
                match pos.checked_add(*len) {
                    Some(end) if end <= self.items.len() => {
                        self.items.drain(*pos..end);
                        true
                    }
                    _ => self.ignore("remove-range", *pos),
                }
            }
            UpdateOp::Move { from, to } => {
                if *from < self.items.len() && *to < self.items.len() {
                    let item = self.items.remove(*from);
                    self.items.insert(*to, item);
                    true
                } else {
                    self.ignore("move", *from)
                }
            }
        }
    }

    fn ignore(&self, op_name: &str, pos: usize) -> bool {
        warn!(
            "ignoring out-of-range {op_name} at {pos} (len {})",
            self.items.len()
        );
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operations_mutate_and_advance_the_version() {
        let mut list = VersionedList::from_items(vec![1, 2, 3]);
        assert_eq!(list.version(), 0);
        assert!(!list.is_empty());
        assert_eq!(list.get(1), Some(&2));
        assert_eq!(list.get(3), None);

        assert!(list.apply(&UpdateOp::InsertRange { pos: 3, items: vec![4, 5] }));
        assert_eq!(list.items(), &[1, 2, 3, 4, 5]);

        assert!(list.apply(&UpdateOp::SetRange { pos: 0, items: vec![9] }));
        assert_eq!(list.items(), &[9, 2, 3, 4, 5]);

        assert!(list.apply(&UpdateOp::RemoveRange { pos: 1, len: 2 }));
        assert_eq!(list.items(), &[9, 4, 5]);

        assert!(list.apply(&UpdateOp::Move { from: 0, to: 2 }));
        assert_eq!(list.items(), &[4, 5, 9]);

        assert!(list.apply(&UpdateOp::ReplaceAll(Arc::new(vec![7]))));
        assert_eq!(list.items(), &[7]);
        assert_eq!(list.version(), 5);
    }

    #[test]
    fn out_of_range_operations_are_silent_no_ops() {
        let mut list = VersionedList::from_items(vec![1, 2, 3]);

        assert!(!list.apply(&UpdateOp::SetRange { pos: 2, items: vec![8, 9] }));
        assert!(!list.apply(&UpdateOp::InsertRange { pos: 4, items: vec![8] }));
        assert!(!list.apply(&UpdateOp::RemoveRange { pos: 1, len: 3 }));
        assert!(!list.apply(&UpdateOp::Move { from: 3, to: 0 }));
        assert!(!list.apply(&UpdateOp::RemoveRange { pos: usize::MAX, len: 2 }));

        assert_eq!(list.items(), &[1, 2, 3]);
        assert_eq!(list.version(), 0);
    }

    #[test]
    fn unversioned_apply_keeps_the_counter() {
        let mut list = VersionedList::from_items(vec![1, 2]);
        assert!(list.apply_unversioned(&UpdateOp::RemoveRange { pos: 0, len: 1 }));
        assert_eq!(list.items(), &[2]);
        assert_eq!(list.version(), 0);
    }

    #[test]
    fn move_lands_on_the_final_position() {
        let mut list = VersionedList::from_items(vec!['a', 'b', 'c', 'd']);
        assert!(list.apply(&UpdateOp::Move { from: 1, to: 3 }));
        assert_eq!(list.items(), &['a', 'c', 'd', 'b']);
    }
}
