use crate::record::compare_seq;

/// Packet loss accounting for inbound DTLS records.
///
/// Tracks the sequence number expected next within the current epoch. A
/// record ahead of the expectation counts the gap as lost. A late record
/// (behind the expectation) recovers one previously counted loss, unless the
/// 64-record window of seen sequences shows it arrived before. Records older
/// than the window recover nothing.
///
/// Sequence numbers are only comparable within an epoch. When the epoch
/// changes the expectation restarts from the new record and nothing is
/// counted as lost.
#[derive(Debug, Default)]
pub(crate) struct LossTracker {
    epoch: Option<u16>,
    expected: u16,
    /// Bit `n` set when `expected - 1 - n` was received.
    seen: u64,
    received: u64,
    lost: u64,
}

impl LossTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one inbound record.
    pub fn observe(&mut self, epoch: u16, seq: u16) {
        self.received += 1;

        if self.epoch != Some(epoch) {
            self.epoch = Some(epoch);
            self.expected = seq.wrapping_add(1);
            self.seen = 1;
            return;
        }

        let delta = compare_seq(seq, self.expected);

        if delta >= 0 {
            self.lost += delta as u64;
            self.expected = seq.wrapping_add(1);
            let shift = delta as u32 + 1;
            self.seen = self.seen.checked_shl(shift).unwrap_or(0) | 1;
            return;
        }

        let offset = (-delta - 1) as u32;
        if offset >= u64::BITS {
            trace!("Record {} too old to account", seq);
            return;
        }

        let mask = 1u64 << offset;
        if self.seen & mask != 0 {
            trace!("Duplicate record {}", seq);
            return;
        }

        // Reordered, the gap it left was already counted.
        self.seen |= mask;
        self.lost = self.lost.saturating_sub(1);
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn lost(&self) -> u64 {
        self.lost
    }
}
