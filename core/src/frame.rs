//! Frame identity: sequence numbers and in-flight slots.
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`SequenceNumber`] | Monotonic 64-bit frame id, first frame is 1 |
//! | [`Slot`] | `sequence % frames_in_flight`, selects per-slot resources |
//! | [`FrameIdentity`] | Both of the above plus the in-flight count |

use crate::strong_type;

strong_type!(
    /// Monotonically increasing frame id.
    pub struct SequenceNumber(u64);
);

strong_type!(
    /// Per-frame resource slot in `[0, frames_in_flight)`.
    pub struct Slot(u32);
);

/// Default number of frames the CPU may record ahead of the GPU.
pub const FRAMES_IN_FLIGHT: u32 = 3;

/// Largest supported frames-in-flight count.
pub const MAX_FRAMES_IN_FLIGHT: u32 = 3;

impl SequenceNumber {
    /// Returns the next sequence number.
    #[inline]
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Slot derived from this sequence number.
    #[inline]
    pub fn slot(self, frames_in_flight: u32) -> Slot {
        Slot((self.0 % u64::from(frames_in_flight.max(1))) as u32)
    }
}

impl Slot {
    /// Index for per-slot arrays.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Identity of a frame being produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameIdentity {
    pub sequence: SequenceNumber,
    pub slot: Slot,
    pub frames_in_flight: u32,
}

impl FrameIdentity {
    /// Identity before the first frame (sequence 0).
    pub fn initial(frames_in_flight: u32) -> Self {
        Self {
            sequence: SequenceNumber(0),
            slot: Slot(0),
            frames_in_flight: frames_in_flight.clamp(1, MAX_FRAMES_IN_FLIGHT),
        }
    }

    /// Advances to the next frame, recomputing the slot.
    pub fn advance(&mut self) {
        self.sequence = self.sequence.next();
        self.slot = self.sequence.slot(self.frames_in_flight);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_keeps_slot_in_sync() {
        let mut id = FrameIdentity::initial(3);
        let mut last = id.sequence;
        for _ in 0..10 {
            id.advance();
            assert!(id.sequence > last);
            assert_eq!(u64::from(id.slot.get()), id.sequence.get() % 3);
            last = id.sequence;
        }
        assert_eq!(id.sequence, SequenceNumber(10));
    }

    #[test]
    fn test_frames_in_flight_clamped() {
        assert_eq!(FrameIdentity::initial(0).frames_in_flight, 1);
        assert_eq!(FrameIdentity::initial(8).frames_in_flight, MAX_FRAMES_IN_FLIGHT);
    }
}
