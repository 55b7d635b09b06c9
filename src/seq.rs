//! Sequence-number arithmetic and the Internet checksum.
//!
//! TCP sequence numbers live on a 32-bit ring: `SND.NXT` can wrap past
//! `u32::MAX` back to `0` in the middle of a long-lived connection, so every
//! comparison in the engine goes through these helpers instead of the
//! built-in `<`/`<=` operators.

/// `a < b` under modular arithmetic.
pub fn mod_le(a: u32, b: u32) -> bool {
    // k is on the opposite side of the ring of integers mod 32 from b
    let k = b.wrapping_add(u32::MAX / 2);

    // There are six cases:
    //  0123456789
    // |a b    k  | a<b, a<k, b<k -> a<b
    // |a k    b  | a<b, a<k, b>k -> a>b
    // |  b a  k  | a>b, a<k, b<k -> a>b
    // |  k a  b  | a<b, a>k, b>k -> a<b
    // |  b    k a| a>b, a>k, b<k -> a<b
    // |  k    b a| a>b, a>k, b>k -> a>b
    (a < b) ^ (a < k) ^ (b < k)
}

/// `a <= b` under modular arithmetic.
pub fn mod_leq(a: u32, b: u32) -> bool {
    mod_le(a, b.wrapping_add(1))
}

/// `a > b` under modular arithmetic.
pub fn mod_ge(a: u32, b: u32) -> bool {
    mod_le(b, a)
}

/// `a >= b` under modular arithmetic.
pub fn mod_geq(a: u32, b: u32) -> bool {
    mod_le(b.wrapping_sub(1), a)
}

/// Is `b` between `a` and `c`, accounting for wraparound?
pub fn mod_bounded(a: u32, ab_cmp: ModCmp, b: u32, bc_cmp: ModCmp, c: u32) -> bool {
    let a = a.wrapping_sub(ab_cmp.offset());
    let c = c.wrapping_add(bc_cmp.offset());

    // a < b < c holds under the following conditions:
    // j: | a b c |
    // k: | c a b |
    // l: | b c a |
    let j = a < b && b < c && a < c;
    let k = a < b && b > c && a > c;
    let l = a > b && b < c && a > c;
    j || k || l
}

pub use ModCmp::*;

/// Whether a bound in [`mod_bounded`] is strict (`Le`) or inclusive (`Leq`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModCmp {
    Le,
    Leq,
}

impl ModCmp {
    fn offset(self) -> u32 {
        match self {
            Le => 0,
            Leq => 1,
        }
    }
}

/// One's-complement accumulator for the Internet checksum (RFC 1071), used
/// for TCP and IPv4 pseudo-header checksums.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Checksum(u16);

impl Checksum {
    /// Creates a new checksum calculator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a `u16` to the checksum value.
    pub fn add_u16(&mut self, value: u16) {
        let (sum, carry) = self.0.overflowing_add(value);
        self.0 = sum + carry as u16;
    }

    /// Adds a `u16` formed by two `u8`s to the checksum value.
    pub fn add_u8(&mut self, a: u8, b: u8) {
        self.add_u16(u16::from_be_bytes([a, b]));
    }

    /// Adds two `u16`s to the checksum value by splitting a `u32` in half.
    pub fn add_u32(&mut self, value: [u8; 4]) {
        self.add_u8(value[0], value[1]);
        self.add_u8(value[2], value[3]);
    }

    /// Folds the remaining bytes of an iterator into the checksum two at a
    /// time, padding a trailing odd byte with a zero as RFC 1071 specifies.
    /// Returns the number of bytes consumed, for use as the pseudo-header
    /// length field.
    pub fn accumulate_remainder(&mut self, bytes: &mut impl Iterator<Item = u8>) -> u16 {
        let mut len = 0u16;
        loop {
            match (bytes.next(), bytes.next()) {
                (Some(a), Some(b)) => {
                    self.add_u8(a, b);
                    len += 2;
                }
                (Some(a), None) => {
                    self.add_u8(a, 0);
                    len += 1;
                    break;
                }
                (None, _) => break,
            }
        }
        len
    }

    /// Computes the final checksum value.
    pub fn as_u16(&self) -> u16 {
        match self.0 {
            // Use that there are two one's complement representations of zero
            // and pick the nonzero one to differentiate from an unused
            // checksum.
            0xffff => 0xffff,
            sum => !sum,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modular_comparison() {
        assert!(mod_le(10, 20));
        assert!(!mod_le(20, 10));
        assert!(mod_le(2_000_000_000, 3_000_000_000));
        assert!(!mod_le(3_000_000_000, 2_000_000_000));
        assert!(mod_le(3_000_000_000, 4_000_000_000));
        assert!(!mod_le(4_000_000_000, 3_000_000_000));

        assert!(!mod_le(5, 5));
        assert!(mod_leq(5, 5));

        assert!(mod_ge(20, 10));
        assert!(!mod_ge(5, 5));
        assert!(mod_geq(5, 5));

        assert!(mod_bounded(5, Le, 10, Le, 15));
        assert!(!mod_bounded(15, Le, 10, Le, 5));

        assert!(mod_bounded(u32::MAX - 5, Le, 5, Le, 10));
        assert!(!mod_bounded(10, Le, 5, Le, u32::MAX - 5));

        assert!(!mod_bounded(5, Le, 5, Le, 15));
        assert!(mod_bounded(5, Leq, 5, Le, 15));
        assert!(!mod_bounded(5, Le, 15, Le, 15));
        assert!(mod_bounded(5, Le, 15, Leq, 15));
        assert!(mod_bounded(10, Leq, 10, Leq, 10));
    }

    #[test]
    fn checksum_of_known_bytes() {
        let mut sum = Checksum::new();
        sum.add_u16(0x0001);
        sum.add_u16(0xf203);
        sum.add_u16(0xf4f5);
        sum.add_u16(0xf6f7);
        assert_eq!(sum.as_u16(), 0x220d);
    }

    #[test]
    fn accumulate_remainder_pads_odd_length() {
        let mut sum = Checksum::new();
        let mut bytes = [0xabu8, 0xcd, 0xef].into_iter();
        let len = sum.accumulate_remainder(&mut bytes);
        assert_eq!(len, 3);

        let mut expected = Checksum::new();
        expected.add_u8(0xab, 0xcd);
        expected.add_u8(0xef, 0x00);
        assert_eq!(sum, expected);
    }
}
