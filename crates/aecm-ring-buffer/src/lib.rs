#![doc = include_str!("../README.md")]

/// Outcome of a [`RingBuffer::read`] call.
///
/// Distinguishes a read that could be served as a borrowed view into the
/// backing store from one that required copying into caller-supplied
/// scratch space because the read region wrapped around the end of the
/// buffer.
#[derive(Debug)]
pub enum Read<'a, T> {
    /// The read region was contiguous; this is a direct view into the
    /// buffer's backing store.
    Contiguous(&'a [T]),
    /// The read region wrapped around the end of the buffer; the data was
    /// copied into the scratch slice passed to `read`.
    Copied(&'a [T]),
}

impl<'a, T> Read<'a, T> {
    /// The read elements, regardless of which variant produced them.
    pub fn as_slice(&self) -> &[T] {
        match self {
            Read::Contiguous(s) | Read::Copied(s) => s,
        }
    }

    /// Number of elements actually read.
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// True if no elements were read.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A typed, fixed-capacity FIFO with wrap-around.
///
/// `write` silently truncates to the available capacity; `read` yields up to
/// `count` elements, reporting whether the region was contiguous (see
/// [`Read`]); `move_read_ptr` rewinds or advances the read cursor, clamped to
/// the available read/write range, which is how a far-end buffer is
/// "stuffed" or flushed for drift compensation.
///
/// Single-reader/single-writer by construction; not thread-safe.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    data: Vec<T>,
    read_pos: usize,
    write_pos: usize,
    capacity: usize,
    /// `false` while `read_pos` and `write_pos` are in the same lap around
    /// the buffer, `true` once `write_pos` has lapped `read_pos`.
    wrapped: bool,
}

impl<T: Copy + Default> RingBuffer<T> {
    /// Creates a buffer holding `capacity` elements, zero-initialized.
    ///
    /// # Panics
    /// Panics if `capacity == 0`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be nonzero");
        let mut buf = Self {
            data: vec![T::default(); capacity],
            read_pos: 0,
            write_pos: 0,
            capacity,
            wrapped: false,
        };
        buf.init();
        buf
    }

    /// Resets the buffer to empty and zeroes the backing store.
    ///
    /// Idempotent: calling `init` repeatedly on a live buffer always yields
    /// the same empty state.
    pub fn init(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
        self.wrapped = false;
        self.data.fill(T::default());
    }

    /// Number of elements available to read.
    pub fn available_read(&self) -> usize {
        if self.wrapped {
            self.capacity - self.read_pos + self.write_pos
        } else {
            self.write_pos - self.read_pos
        }
    }

    /// Number of elements that can be written before the buffer is full.
    pub fn available_write(&self) -> usize {
        self.capacity - self.available_read()
    }

    /// Total element capacity of the buffer.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Writes as many of `data` as fit in the remaining capacity, returning
    /// the number actually written. Excess input is silently dropped.
    pub fn write(&mut self, data: &[T]) -> usize {
        let free = self.available_write();
        let n = data.len().min(free);
        let margin = self.capacity - self.write_pos;

        let mut written = 0;
        if n > margin {
            self.data[self.write_pos..self.capacity].copy_from_slice(&data[..margin]);
            self.write_pos = 0;
            self.wrapped = true;
            written = margin;
        }
        let remaining = n - written;
        self.data[self.write_pos..self.write_pos + remaining]
            .copy_from_slice(&data[written..written + remaining]);
        self.write_pos += remaining;

        n
    }

    /// Reads up to `count` elements. If the region wraps around the end of
    /// the buffer the data is copied into `scratch` (which must be at least
    /// `count` elements long); otherwise a direct view into the backing
    /// store is returned with no copy.
    pub fn read<'a>(&'a mut self, count: usize, scratch: &'a mut [T]) -> Read<'a, T> {
        let Self {
            data,
            read_pos,
            write_pos,
            capacity,
            wrapped,
        } = self;
        let capacity = *capacity;

        let available = if *wrapped {
            capacity - *read_pos + *write_pos
        } else {
            *write_pos - *read_pos
        };
        let n = count.min(available);
        let margin = capacity - *read_pos;

        let outcome = if n > margin {
            scratch[..margin].copy_from_slice(&data[*read_pos..capacity]);
            scratch[margin..n].copy_from_slice(&data[..n - margin]);
            Read::Copied(&scratch[..n])
        } else {
            Read::Contiguous(&data[*read_pos..*read_pos + n])
        };

        advance_read_pos(read_pos, wrapped, capacity, n as isize);
        outcome
    }

    /// Advances (`count > 0`) or rewinds (`count < 0`) the read cursor,
    /// clamped to `[-available_write, available_read]`. Returns the signed
    /// number of elements actually moved.
    ///
    /// A negative move is how the far-end FIFO is "stuffed" with replays for
    /// drift compensation; a positive move discards unread elements.
    pub fn move_read_ptr(&mut self, count: isize) -> isize {
        let available_read = self.available_read() as isize;
        let available_write = self.available_write() as isize;
        let clamped = count.clamp(-available_write, available_read);
        advance_read_pos(&mut self.read_pos, &mut self.wrapped, self.capacity, clamped);
        clamped
    }
}

/// Shared read-position update used by both `read` and `move_read_ptr`;
/// factored out so `read` can apply it after already borrowing `data`
/// immutably for the returned slice.
fn advance_read_pos(read_pos: &mut usize, wrapped: &mut bool, capacity: usize, count: isize) {
    let mut pos = *read_pos as isize + count;
    if pos > capacity as isize {
        pos -= capacity as isize;
        *wrapped = false;
    } else if pos < 0 {
        pos += capacity as isize;
        *wrapped = true;
    }
    *read_pos = pos as usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let mut buf = RingBuffer::<i16>::new(8);
        let input = [1, 2, 3, 4, 5];
        assert_eq!(buf.write(&input), 5);
        assert_eq!(buf.available_read(), 5);

        let mut scratch = [0i16; 8];
        let out = buf.read(5, &mut scratch);
        assert_eq!(out.as_slice(), &input);
        assert_eq!(buf.available_read(), 0);
    }

    #[test]
    fn write_truncates_to_capacity() {
        let mut buf = RingBuffer::<i16>::new(4);
        let input = [1, 2, 3, 4, 5, 6];
        assert_eq!(buf.write(&input), 4);
        assert_eq!(buf.available_write(), 0);
    }

    #[test]
    fn wrap_around_read_is_copied() {
        let mut buf = RingBuffer::<i16>::new(4);
        buf.write(&[1, 2, 3]);
        let mut scratch = [0i16; 4];
        buf.read(2, &mut scratch); // read_pos = 2, 1 element left
        buf.write(&[4, 5]); // write_pos wraps: writes at 3, then 0
        let out = buf.read(3, &mut scratch);
        assert!(matches!(out, Read::Copied(_)));
        assert_eq!(out.as_slice(), &[3, 4, 5]);
    }

    #[test]
    fn contiguous_read_borrows_without_copy() {
        let mut buf = RingBuffer::<i16>::new(8);
        buf.write(&[10, 20, 30]);
        let mut scratch = [0i16; 8];
        let out = buf.read(3, &mut scratch);
        assert!(matches!(out, Read::Contiguous(_)));
        assert_eq!(out.as_slice(), &[10, 20, 30]);
    }

    #[test]
    fn available_counts_always_sum_to_capacity() {
        let mut buf = RingBuffer::<i16>::new(10);
        let mut scratch = [0i16; 10];
        for round in 0..50 {
            buf.write(&[round as i16; 3]);
            buf.read(2, &mut scratch);
            assert_eq!(buf.available_read() + buf.available_write(), buf.capacity());
        }
    }

    #[test]
    fn move_read_ptr_rewind_then_drain_replays_data() {
        let mut buf = RingBuffer::<i16>::new(8);
        buf.write(&[1, 2, 3, 4]);
        let mut scratch = [0i16; 8];
        buf.read(4, &mut scratch);
        assert_eq!(buf.available_read(), 0);

        let moved = buf.move_read_ptr(-4);
        assert_eq!(moved, -4);
        assert_eq!(buf.available_read(), 4);
        let out = buf.read(4, &mut scratch);
        assert_eq!(out.as_slice(), &[1, 2, 3, 4]);
    }

    #[test]
    fn move_read_ptr_clamps_to_bounds() {
        let mut buf = RingBuffer::<i16>::new(4);
        buf.write(&[1, 2]);
        assert_eq!(buf.move_read_ptr(100), 2);
        assert_eq!(buf.move_read_ptr(-100), -2);
    }

    #[test]
    fn init_is_idempotent() {
        let mut buf = RingBuffer::<i16>::new(4);
        buf.write(&[1, 2, 3]);
        buf.init();
        let snapshot = buf.clone();
        buf.init();
        assert_eq!(snapshot.read_pos, buf.read_pos);
        assert_eq!(snapshot.write_pos, buf.write_pos);
        assert_eq!(snapshot.available_read(), buf.available_read());
    }
}
