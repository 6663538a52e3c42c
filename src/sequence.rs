/// Wire sequence numbers are absolute packet indexes taken modulo a small modulus. This type
///  does the modular arithmetic, and it maps wire sequences back to absolute indexes.
///
/// Absolute indexes start at 1 for the first data packet of a transfer, so a transfer's packets
///  go out as `1, 2, ..., modulus-1, 0, 1, ...` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceSpace {
    modulus: u16,
}

impl SequenceSpace {
    pub fn new(modulus: u16) -> SequenceSpace {
        assert!(modulus >= 2, "sequence modulus must be at least 2, was {}", modulus);
        SequenceSpace { modulus }
    }

    pub fn wire(&self, index: u64) -> u16 {
        (index % self.modulus as u64) as u16
    }

    fn contains(&self, sequence: u16) -> bool {
        sequence < self.modulus
    }

    /// number of steps going forward from `from` to reach `to`
    pub fn distance(&self, from: u16, to: u16) -> u16 {
        let m = self.modulus as u32;
        ((to as u32 % m + m - from as u32 % m) % m) as u16
    }

    /// Returns the absolute index closest to `reference` whose wire representation is
    ///  `sequence`.
    ///
    /// The result is unambiguous as long as the real index is less than half the modulus away
    ///  from the reference, which is why window sizes are limited to half the modulus.
    pub fn unwrap(&self, sequence: u16, reference: u64) -> Option<u64> {
        if !self.contains(sequence) {
            return None;
        }

        let m = self.modulus as u64;
        let forward = self.distance(self.wire(reference), sequence) as u64;
        if forward < m / 2 {
            reference.checked_add(forward)
        }
        else {
            reference.checked_sub(m - forward)
        }
    }
}
