//! Duplicate/resize helper.
//!
//! Regions are built from source sequences whose length need not match the
//! region's. The policy is fixed: a longer source is truncated, a shorter
//! one is padded with `T::default()`.

/// Copy `source` into a new vector of exactly `len` elements.
///
/// ```
/// use tierarray_region::adapt;
///
/// assert_eq!(adapt(&[1, 2, 3], 5), vec![1, 2, 3, 0, 0]);
/// assert_eq!(adapt(&[1, 2, 3, 4, 5], 2), vec![1, 2]);
/// ```
pub fn adapt<T: Clone + Default>(source: &[T], len: usize) -> Vec<T> {
    let mut out = Vec::with_capacity(len);
    let keep = source.len().min(len);
    out.extend_from_slice(&source[..keep]);
    out.resize(len, T::default());
    out
}

/// In-place form of [`adapt`]: fill `target` from `source`, truncating or
/// padding with `T::default()`.
pub fn adapt_into<T: Clone + Default>(source: &[T], target: &mut [T]) {
    let keep = source.len().min(target.len());
    let (head, tail) = target.split_at_mut(keep);
    head.clone_from_slice(&source[..keep]);
    tail.fill(T::default());
}
