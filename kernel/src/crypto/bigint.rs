//! Fixed-width big unsigned integer with modular exponentiation, used to
//! verify RSA-style module signatures (spec.md §6's module header carries
//! an optional signature field).
//!
//! Schoolbook arithmetic only — no Montgomery reduction or constant-time
//! guarantees. Signature verification is not a hot path, so simplicity
//! wins over speed here.

const LIMBS: usize = 64; // 64 * 32 = 2048 bits

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BigUint {
    limbs: [u32; LIMBS], // little-endian limbs
}

impl BigUint {
    pub const fn zero() -> Self {
        Self { limbs: [0; LIMBS] }
    }

    pub fn from_u64(v: u64) -> Self {
        let mut n = Self::zero();
        n.limbs[0] = v as u32;
        n.limbs[1] = (v >> 32) as u32;
        n
    }

    /// Parse from a big-endian byte slice (as module signatures and RSA
    /// moduli are conventionally encoded).
    pub fn from_be_bytes(bytes: &[u8]) -> Self {
        let mut n = Self::zero();
        for (i, &byte) in bytes.iter().rev().enumerate() {
            let limb = i / 4;
            let shift = (i % 4) * 8;
            if limb < LIMBS {
                n.limbs[limb] |= (byte as u32) << shift;
            }
        }
        n
    }

    pub fn to_be_bytes(&self, out: &mut [u8]) {
        let n = out.len();
        for (i, slot) in out.iter_mut().enumerate() {
            let byte_idx = n - 1 - i;
            let limb = byte_idx / 4;
            let shift = (byte_idx % 4) * 8;
            *slot = if limb < LIMBS {
                ((self.limbs[limb] >> shift) & 0xFF) as u8
            } else {
                0
            };
        }
    }

    fn is_zero(&self) -> bool {
        self.limbs.iter().all(|&l| l == 0)
    }

    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        for i in (0..LIMBS).rev() {
            match self.limbs[i].cmp(&other.limbs[i]) {
                core::cmp::Ordering::Equal => continue,
                ord => return ord,
            }
        }
        core::cmp::Ordering::Equal
    }

    fn sub_in_place(&mut self, other: &Self) {
        let mut borrow = 0i64;
        for i in 0..LIMBS {
            let diff = self.limbs[i] as i64 - other.limbs[i] as i64 - borrow;
            if diff < 0 {
                self.limbs[i] = (diff + (1i64 << 32)) as u32;
                borrow = 1;
            } else {
                self.limbs[i] = diff as u32;
                borrow = 0;
            }
        }
    }

    fn shl1(&mut self) -> u32 {
        let mut carry = 0u32;
        for limb in self.limbs.iter_mut() {
            let new_carry = *limb >> 31;
            *limb = (*limb << 1) | carry;
            carry = new_carry;
        }
        carry
    }

    /// `self % modulus`, via binary long division.
    fn rem(&self, modulus: &Self) -> Self {
        let mut remainder = Self::zero();
        for i in (0..LIMBS * 32).rev() {
            let bit = (self.limbs[i / 32] >> (i % 32)) & 1;
            remainder.shl1();
            remainder.limbs[0] |= bit;
            if remainder.cmp(modulus) != core::cmp::Ordering::Less {
                remainder.sub_in_place(modulus);
            }
        }
        remainder
    }

    fn mul_rem(&self, other: &Self, modulus: &Self) -> Self {
        let mut result = Self::zero();
        let mut base = self.rem(modulus);
        for i in 0..LIMBS * 32 {
            let bit = (other.limbs[i / 32] >> (i % 32)) & 1;
            if bit == 1 {
                result = add_rem(&result, &base, modulus);
            }
            base = add_rem(&base, &base, modulus);
        }
        result
    }

    /// `self^exponent mod modulus`, via binary square-and-multiply.
    pub fn modpow(&self, exponent: &Self, modulus: &Self) -> Self {
        if modulus.is_zero() {
            return Self::zero();
        }
        let mut result = Self::from_u64(1).rem(modulus);
        let mut base = self.rem(modulus);
        for i in 0..LIMBS * 32 {
            let bit = (exponent.limbs[i / 32] >> (i % 32)) & 1;
            if bit == 1 {
                result = result.mul_rem(&base, modulus);
            }
            base = base.mul_rem(&base, modulus);
        }
        result
    }
}

fn add_rem(a: &BigUint, b: &BigUint, modulus: &BigUint) -> BigUint {
    let mut result = *a;
    let mut carry = 0u64;
    for i in 0..LIMBS {
        let sum = result.limbs[i] as u64 + b.limbs[i] as u64 + carry;
        result.limbs[i] = sum as u32;
        carry = sum >> 32;
    }
    if carry != 0 || result.cmp(modulus) != core::cmp::Ordering::Less {
        result.sub_in_place(modulus);
    }
    result
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn small_modpow_matches_known_value() {
        // 4^13 mod 497 = 445 (textbook RSA example).
        let base = BigUint::from_u64(4);
        let exp = BigUint::from_u64(13);
        let modulus = BigUint::from_u64(497);
        let result = base.modpow(&exp, &modulus);
        let mut out = [0u8; 8];
        result.to_be_bytes(&mut out);
        assert_eq!(u64::from_be_bytes(out), 445);
    }

    #[test]
    fn modpow_by_zero_exponent_is_one() {
        let base = BigUint::from_u64(7);
        let exp = BigUint::zero();
        let modulus = BigUint::from_u64(100);
        let result = base.modpow(&exp, &modulus);
        let mut out = [0u8; 8];
        result.to_be_bytes(&mut out);
        assert_eq!(u64::from_be_bytes(out), 1);
    }

    #[test]
    fn round_trips_through_be_bytes() {
        let n = BigUint::from_u64(0x0102_0304_0506_0708);
        let mut out = [0u8; 8];
        n.to_be_bytes(&mut out);
        assert_eq!(out, [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        assert_eq!(BigUint::from_be_bytes(&out), n);
    }
}
