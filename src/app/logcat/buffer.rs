use std::collections::VecDeque;

/// Newest-first consumer buffer with pause/resume.
///
/// While paused, arrivals collect in a side buffer so the visible collection stays still;
/// `resume` splices them back in front. Both collections are capped at `capacity`, dropping
/// from the oldest end.
#[derive(Debug)]
pub struct PauseBuffer<T> {
    entries: VecDeque<T>,
    paused_entries: VecDeque<T>,
    paused: bool,
    capacity: usize,
}

impl<T: Clone> PauseBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            paused_entries: VecDeque::new(),
            paused: false,
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, entry: T) {
        let capacity = self.capacity;
        let target = if self.paused {
            &mut self.paused_entries
        } else {
            &mut self.entries
        };
        target.push_front(entry);
        target.truncate(capacity);
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        if !self.paused {
            return;
        }
        self.paused = false;
        let mut merged = std::mem::take(&mut self.paused_entries);
        merged.append(&mut self.entries);
        merged.truncate(self.capacity);
        self.entries = merged;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Visible entries, newest first. Excludes anything held back by a pause.
    pub fn snapshot(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.paused_entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.paused_entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_pushes_are_newest_first() {
        let mut buffer = PauseBuffer::new(10);
        for n in 1..=3 {
            buffer.push(n);
        }
        assert_eq!(buffer.snapshot(), vec![3, 2, 1]);
    }

    #[test]
    fn pause_holds_back_arrivals_until_resume() {
        let mut buffer = PauseBuffer::new(10);
        buffer.push(1);
        buffer.push(2);
        buffer.pause();
        buffer.push(3);
        buffer.push(4);

        assert_eq!(buffer.snapshot(), vec![2, 1]);
        assert_eq!(buffer.pending_len(), 2);

        buffer.resume();
        assert!(!buffer.is_paused());
        assert_eq!(buffer.snapshot(), vec![4, 3, 2, 1]);
        assert_eq!(buffer.pending_len(), 0);
    }

    #[test]
    fn resume_truncates_oldest_entries() {
        let mut buffer = PauseBuffer::new(4);
        for n in 1..=3 {
            buffer.push(n);
        }
        buffer.pause();
        for n in 4..=6 {
            buffer.push(n);
        }
        buffer.resume();
        assert_eq!(buffer.snapshot(), vec![6, 5, 4, 3]);
    }

    #[test]
    fn paused_side_is_bounded_by_capacity() {
        let mut buffer = PauseBuffer::new(3);
        buffer.pause();
        for n in 1..=10 {
            buffer.push(n);
        }
        assert_eq!(buffer.pending_len(), 3);
        buffer.resume();
        assert_eq!(buffer.snapshot(), vec![10, 9, 8]);
    }

    #[test]
    fn live_pushes_respect_capacity() {
        let mut buffer = PauseBuffer::new(2);
        for n in 1..=5 {
            buffer.push(n);
        }
        assert_eq!(buffer.snapshot(), vec![5, 4]);
    }

    #[test]
    fn resume_without_pause_is_a_no_op() {
        let mut buffer = PauseBuffer::new(5);
        buffer.push(1);
        buffer.resume();
        assert_eq!(buffer.snapshot(), vec![1]);
    }
}
