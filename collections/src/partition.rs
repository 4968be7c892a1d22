use std::ops::Range;

/// Splits `0..len` into the fewest consecutive ranges of length at most `max`,
/// making their lengths differ by at most one.
pub(crate) fn even_ranges(len: usize, max: usize) -> impl Iterator<Item = Range<usize>> {
    debug_assert!(max > 0);
    let groups = len.div_ceil(max);
    let (base, extra) = if groups == 0 {
        (0, 0)
    } else {
        (len / groups, len % groups)
    };
    (0..groups).scan(0, move |start, i| {
        let size = base + usize::from(i < extra);
        let range = *start..*start + size;
        *start += size;
        Some(range)
    })
}
