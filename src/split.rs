// src/split.rs

use crate::models::ByteRange;

/// Partitions `[0, content_length - 1]` into at most `max_parts` contiguous,
/// non-overlapping, gap-free inclusive ranges.
///
/// The part count is `min(ceil(content_length / chunk_size), max_parts)`;
/// every range gets `content_length / parts` bytes (integer division) and
/// the final range absorbs the remainder, so the union covers the resource
/// exactly once. Returns no ranges for an empty resource.
pub fn split_ranges(content_length: u64, chunk_size: u64, max_parts: usize) -> Vec<ByteRange> {
    if content_length == 0 || chunk_size == 0 || max_parts == 0 {
        return Vec::new();
    }

    let num_parts = content_length
        .div_ceil(chunk_size)
        .min(max_parts as u64);
    let part_size = content_length / num_parts;

    let mut ranges = Vec::with_capacity(num_parts as usize);
    let mut start = 0u64;
    for i in 0..num_parts {
        let end = if i == num_parts - 1 {
            content_length - 1
        } else {
            start + part_size - 1
        };
        ranges.push(ByteRange::new(start, end));
        start = end + 1;
    }
    ranges
}
