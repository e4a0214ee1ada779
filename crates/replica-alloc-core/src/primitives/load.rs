// Copyright (c) 2025 Felix Kahle.
//
// Permission is hereby granted, free of charge, to any person obtaining
// a copy of this software and associated documentation files (the
// "Software"), to deal in the Software without restriction, including
// without limitation the rights to use, copy, modify, merge, publish,
// distribute, sublicense, and/or sell copies of the Software, and to
// permit persons to whom the Software is furnished to do so, subject to
// the following conditions:
//
// The above copyright notice and this permission notice shall be
// included in all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND,
// EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF
// MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND
// NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE
// LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN ACTION
// OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN CONNECTION
// WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

use std::ops::{AddAssign, Index, SubAssign};

/// A fixed-length vector of per-metric load values, indexed by global
/// metric id. Values are signed: a negative entry means load leaving a
/// node during a trial move or swap.
///
/// Length mismatches and out-of-range indices are modeling bugs, not
/// recoverable conditions, and panic.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct LoadEntry {
    values: Vec<i64>,
}

impl LoadEntry {
    /// Creates a zeroed load vector over `metric_count` metrics.
    #[inline]
    pub fn zeroed(metric_count: usize) -> Self {
        Self {
            values: vec![0; metric_count],
        }
    }

    #[inline]
    pub fn from_values(values: Vec<i64>) -> Self {
        Self { values }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[inline]
    pub fn get(&self, index: usize) -> i64 {
        self.values[index]
    }

    #[inline]
    pub fn set(&mut self, index: usize, value: i64) {
        self.values[index] = value;
    }

    /// Adds `delta` to the metric at `index`, in place.
    #[inline]
    pub fn add_load(&mut self, index: usize, delta: i64) {
        self.values[index] += delta;
    }

    #[inline]
    pub fn values(&self) -> &[i64] {
        &self.values
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        self.values.iter().copied()
    }

    /// True when every entry is zero.
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.values.iter().all(|&v| v == 0)
    }

    /// True when some entry of `self` exceeds the matching entry of
    /// `capacity`, skipping metrics where `capacity` is negative
    /// (negative capacity means "unlimited" for that metric).
    pub fn exceeds(&self, capacity: &LoadEntry) -> bool {
        debug_assert_eq!(self.len(), capacity.len(), "metric arity mismatch");
        self.values
            .iter()
            .zip(capacity.values.iter())
            .any(|(&load, &cap)| cap >= 0 && load > cap)
    }

    /// Raises each entry to at least the matching entry of `other`.
    pub fn max_with(&mut self, other: &LoadEntry) {
        debug_assert_eq!(self.len(), other.len(), "metric arity mismatch");
        for (v, &o) in self.values.iter_mut().zip(other.values.iter()) {
            if o > *v {
                *v = o;
            }
        }
    }
}

impl Index<usize> for LoadEntry {
    type Output = i64;

    #[inline]
    fn index(&self, index: usize) -> &i64 {
        &self.values[index]
    }
}

impl AddAssign<&LoadEntry> for LoadEntry {
    fn add_assign(&mut self, rhs: &LoadEntry) {
        debug_assert_eq!(self.len(), rhs.len(), "metric arity mismatch");
        for (v, &r) in self.values.iter_mut().zip(rhs.values.iter()) {
            *v += r;
        }
    }
}

impl SubAssign<&LoadEntry> for LoadEntry {
    fn sub_assign(&mut self, rhs: &LoadEntry) {
        debug_assert_eq!(self.len(), rhs.len(), "metric arity mismatch");
        for (v, &r) in self.values.iter_mut().zip(rhs.values.iter()) {
            *v -= r;
        }
    }
}

impl std::fmt::Display for LoadEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", v)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeroed_has_requested_arity() {
        let l = LoadEntry::zeroed(3);
        assert_eq!(l.len(), 3);
        assert!(l.is_zero());
    }

    #[test]
    fn test_add_load_and_set() {
        let mut l = LoadEntry::zeroed(2);
        l.add_load(0, 5);
        l.add_load(0, -2);
        l.set(1, 7);
        assert_eq!(l.get(0), 3);
        assert_eq!(l[1], 7);
    }

    #[test]
    fn test_negative_values_are_preserved() {
        let mut l = LoadEntry::zeroed(1);
        l.add_load(0, -4);
        assert_eq!(l.get(0), -4);
        assert!(!l.is_zero());
    }

    #[test]
    fn test_add_sub_assign_round_trip() {
        let mut l = LoadEntry::from_values(vec![1, 2, 3]);
        let delta = LoadEntry::from_values(vec![4, -1, 0]);
        let before = l.clone();
        l += &delta;
        assert_eq!(l.values(), &[5, 1, 3]);
        l -= &delta;
        assert_eq!(l, before);
    }

    #[test]
    fn test_exceeds_respects_unlimited_capacity() {
        let load = LoadEntry::from_values(vec![10, 10]);
        let capped = LoadEntry::from_values(vec![5, -1]);
        assert!(load.exceeds(&capped));
        let uncapped = LoadEntry::from_values(vec![-1, -1]);
        assert!(!load.exceeds(&uncapped));
    }

    #[test]
    fn test_max_with_takes_elementwise_max() {
        let mut a = LoadEntry::from_values(vec![1, 9, 3]);
        let b = LoadEntry::from_values(vec![4, 2, 3]);
        a.max_with(&b);
        assert_eq!(a.values(), &[4, 9, 3]);
    }

    #[test]
    #[should_panic]
    fn test_out_of_range_index_panics() {
        let l = LoadEntry::zeroed(1);
        let _ = l.get(1);
    }
}
