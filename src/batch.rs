/// Split `ids` into consecutive groups of at most `size`, preserving order.
/// Only the last group may be shorter. A `size` of 0 is treated as 1.
pub fn batches<T>(ids: &[T], size: usize) -> impl Iterator<Item = &[T]> + '_ {
    ids.chunks(size.max(1))
}
