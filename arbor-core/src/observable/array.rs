//! Array Methods
//!
//! Mutators run against a scratch copy of the array and then store the copy
//! through the regular write path, so listeners see one change with the
//! correct previous value and element moves are detected by the diff.
//!
//! Loopers hand each element to the callback as a child handle and record
//! only a shallow dependency on the array itself.

use std::cmp::Ordering;
use std::ops::{Bound, RangeBounds};

use serde_json::Value;

use super::Observable;
use crate::error::{Error, Result};
use crate::reactive::TrackingContext;

/// Clamp `range` to `0..len`.
fn clamp(range: impl RangeBounds<usize>, len: usize) -> (usize, usize) {
    let start = match range.start_bound() {
        Bound::Included(&start) => start,
        Bound::Excluded(&start) => start.saturating_add(1),
        Bound::Unbounded => 0,
    };
    let end = match range.end_bound() {
        Bound::Included(&end) => end.saturating_add(1),
        Bound::Excluded(&end) => end,
        Bound::Unbounded => len,
    };
    let end = end.min(len);
    (start.min(end), end)
}

impl Observable {
    /// Apply `mutate` to a copy of this node's array and store the result.
    ///
    /// Fails with [`Error::NotAnArray`] when the value is not an array.
    pub fn mutate_array<R>(&self, mutate: impl FnOnce(&mut Vec<Value>) -> R) -> Result<R> {
        let Some(Value::Array(mut items)) = self.peek() else {
            return Err(Error::NotAnArray { path: self.path() });
        };

        let ret = mutate(&mut items);
        self.set(Value::Array(items))?;
        Ok(ret)
    }

    /// Append an element, returning the new length.
    pub fn push(&self, value: impl Into<Value>) -> Result<usize> {
        let value = value.into();
        self.mutate_array(|items| {
            items.push(value);
            items.len()
        })
    }

    pub fn pop(&self) -> Result<Option<Value>> {
        self.mutate_array(Vec::pop)
    }

    pub fn shift(&self) -> Result<Option<Value>> {
        self.mutate_array(|items| (!items.is_empty()).then(|| items.remove(0)))
    }

    /// Prepend an element, returning the new length.
    pub fn unshift(&self, value: impl Into<Value>) -> Result<usize> {
        let value = value.into();
        self.mutate_array(|items| {
            items.insert(0, value);
            items.len()
        })
    }

    /// Remove `delete_count` elements from `start`, insert `insert` in their
    /// place, and return the removed elements. Both bounds are clamped.
    pub fn splice(
        &self,
        start: usize,
        delete_count: usize,
        insert: Vec<Value>,
    ) -> Result<Vec<Value>> {
        self.mutate_array(|items| {
            let start = start.min(items.len());
            let end = start.saturating_add(delete_count).min(items.len());
            items.splice(start..end, insert).collect()
        })
    }

    pub fn reverse(&self) -> Result<()> {
        self.mutate_array(|items| items.reverse())
    }

    /// Stable sort with a comparator.
    pub fn sort_by<F>(&self, compare: F) -> Result<()>
    where
        F: FnMut(&Value, &Value) -> Ordering,
    {
        self.mutate_array(|items| items.sort_by(compare))
    }

    /// Overwrite the elements in `range` with copies of `value`.
    pub fn fill(&self, value: impl Into<Value>, range: impl RangeBounds<usize>) -> Result<()> {
        let value = value.into();
        self.mutate_array(|items| {
            let (start, end) = clamp(range, items.len());
            items[start..end].fill(value);
        })
    }

    /// Copy the elements in `source` to position `dest`, without changing
    /// the length. Elements that would land past the end are dropped.
    pub fn copy_within(&self, source: impl RangeBounds<usize>, dest: usize) -> Result<()> {
        self.mutate_array(|items| {
            let (start, end) = clamp(source, items.len());
            let copied: Vec<Value> = items[start..end].to_vec();
            for (slot, value) in items.iter_mut().skip(dest).zip(copied) {
                *slot = value;
            }
        })
    }

    // ------------------------------------------------------------------
    // Loopers
    // ------------------------------------------------------------------

    /// Handles to every element, recording a shallow dependency.
    fn elements(&self) -> Vec<Observable> {
        TrackingContext::record_read(self, true, false);
        let len = match self.peek() {
            Some(Value::Array(items)) => items.len(),
            _ => 0,
        };
        (0..len).map(|index| self.at(index)).collect()
    }

    pub fn for_each(&self, mut f: impl FnMut(&Observable, usize)) {
        for (index, element) in self.elements().iter().enumerate() {
            f(element, index);
        }
    }

    pub fn map<R>(&self, mut f: impl FnMut(&Observable, usize) -> R) -> Vec<R> {
        self.elements()
            .iter()
            .enumerate()
            .map(|(index, element)| f(element, index))
            .collect()
    }

    pub fn filter(&self, mut f: impl FnMut(&Observable, usize) -> bool) -> Vec<Observable> {
        self.elements()
            .into_iter()
            .enumerate()
            .filter_map(|(index, element)| f(&element, index).then_some(element))
            .collect()
    }

    pub fn some(&self, mut f: impl FnMut(&Observable, usize) -> bool) -> bool {
        self.elements()
            .iter()
            .enumerate()
            .any(|(index, element)| f(element, index))
    }

    pub fn every(&self, mut f: impl FnMut(&Observable, usize) -> bool) -> bool {
        self.elements()
            .iter()
            .enumerate()
            .all(|(index, element)| f(element, index))
    }
}
