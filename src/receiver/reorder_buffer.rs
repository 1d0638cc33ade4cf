use bytes::Bytes;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum InsertOutcome {
    Stored,
    /// the slot is already occupied - the first copy wins
    Duplicate,
    /// the segment was written already
    BelowWindow,
    /// too far ahead of the next segment to write
    BeyondWindow,
}

/// Out-of-order staging for segments ahead of `next_seq`, as a ring buffer. Slot 0 (the one at
///  `head`) always corresponds to `next_seq`, so popping it rotates the ring in O(1) instead of
///  shifting every slot.
pub struct ReorderBuffer {
    slots: Vec<Option<Bytes>>,
    head: usize,
    next_seq: u32,
    /// number of occupied slots, so that gap detection does not scan the ring
    occupied: usize,
}

impl ReorderBuffer {
    pub fn new(capacity: u32) -> anyhow::Result<ReorderBuffer> {
        let capacity = capacity as usize;
        let mut slots = Vec::new();
        slots.try_reserve_exact(capacity)?;
        slots.resize(capacity, None);

        Ok(ReorderBuffer {
            slots,
            head: 0,
            next_seq: 0,
            occupied: 0,
        })
    }

    /// the sequence number of the next segment to be written in order
    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn occupied(&self) -> usize {
        self.occupied
    }

    fn slot_index(&self, relative: usize) -> usize {
        (self.head + relative) % self.slots.len()
    }

    pub fn insert(&mut self, sequence: u32, data: Bytes) -> InsertOutcome {
        if sequence < self.next_seq {
            return InsertOutcome::BelowWindow;
        }
        let relative = (sequence - self.next_seq) as usize;
        if relative >= self.slots.len() {
            return InsertOutcome::BeyondWindow;
        }

        let idx = self.slot_index(relative);
        if self.slots[idx].is_some() {
            return InsertOutcome::Duplicate;
        }
        self.slots[idx] = Some(data);
        self.occupied += 1;
        InsertOutcome::Stored
    }

    /// Takes the segment at `next_seq` if it has arrived, advancing the window by one
    pub fn pop_front(&mut self) -> Option<Bytes> {
        if self.slots.is_empty() {
            return None;
        }

        let data = self.slots[self.head].take()?;
        self.occupied -= 1;
        self.head = (self.head + 1) % self.slots.len();
        self.next_seq += 1;
        Some(data)
    }

    /// `true` if the next segment is missing while a later one has arrived - a confirmed gap
    ///  rather than a segment that is simply not there yet
    pub fn has_gap(&self) -> bool {
        match self.slots.get(self.head) {
            Some(slot) => slot.is_none() && self.occupied > 0,
            None => false,
        }
    }
}
