//! Chunked append-only storage for column indices of a pattern under construction.

/// Append-only index storage that grows in chunks instead of reallocating.
///
/// `reserve` guarantees room for the next row inside the current chunk; when a new
/// chunk is needed its size is the request plus everything allocated so far, so the
/// number of chunks stays logarithmic in the final size. `compact` concatenates the
/// chunks into one contiguous array.
#[derive(Debug, Clone)]
pub struct GrowableColumnArena {
    chunks: Vec<Vec<usize>>,
    chunk_capacity: usize,
    capacity: usize,
    len: usize,
    reallocs: usize,
}

impl GrowableColumnArena {
    pub fn new(initial: usize) -> Self {
        let initial = initial.max(1);
        Self {
            chunks: vec![Vec::with_capacity(initial)],
            chunk_capacity: initial,
            capacity: initial,
            len: 0,
            reallocs: 0,
        }
    }

    fn remaining(&self) -> usize {
        self.chunks
            .last()
            .map_or(0, |c| self.chunk_capacity.saturating_sub(c.len()))
    }

    /// Make room for `n` more indices in the current chunk.
    pub fn reserve(&mut self, n: usize) {
        if self.remaining() >= n {
            return;
        }
        let size = n + self.capacity;
        self.chunks.push(Vec::with_capacity(size));
        self.chunk_capacity = size;
        self.capacity += size;
        self.reallocs += 1;
    }

    /// Append a row. Reserves first if the caller did not.
    pub fn consume(&mut self, row: &[usize]) {
        self.reserve(row.len());
        if let Some(chunk) = self.chunks.last_mut() {
            chunk.extend_from_slice(row);
        }
        self.len += row.len();
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of chunks added after the initial one.
    pub fn reallocs(&self) -> usize {
        self.reallocs
    }

    pub fn compact(self) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.len);
        for chunk in self.chunks {
            out.extend(chunk);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_stay_contiguous_across_chunks() {
        let mut arena = GrowableColumnArena::new(3);
        arena.consume(&[0, 1]);
        arena.consume(&[2, 3, 4]);
        arena.consume(&[5]);
        assert_eq!(arena.reallocs(), 1);
        assert_eq!(arena.len(), 6);
        assert_eq!(arena.compact(), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn generous_initial_size_never_reallocates() {
        let mut arena = GrowableColumnArena::new(100);
        for i in 0..10 {
            arena.consume(&[i; 10]);
        }
        assert_eq!(arena.reallocs(), 0);
    }
}
