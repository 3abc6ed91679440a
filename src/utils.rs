// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::errors::{InternalError, Result};
use num_bigint::{BigUint, ModInverse};

/// Computes a^e (mod n)
pub(crate) fn modpow(a: &BigUint, e: &BigUint, n: &BigUint) -> BigUint {
    a.modpow(e, n)
}

/// Computes a^{-1} (mod n), or errors if gcd(a, n) != 1
pub(crate) fn modinv(a: &BigUint, n: &BigUint) -> Result<BigUint> {
    a.mod_inverse(n)
        .and_then(|inv| inv.to_biguint())
        .ok_or(InternalError::NotInvertible)
}

/// Finds the unique x < m1 * m2 such that x = a1 (mod m1) and x = a2 (mod m2),
/// for coprime moduli m1, m2
pub(crate) fn chinese_remainder_theorem(
    a1: &BigUint,
    a2: &BigUint,
    m1: &BigUint,
    m2: &BigUint,
) -> Result<BigUint> {
    let c1 = modinv(&(m2 % m1), m1)?;
    let c2 = modinv(&(m1 % m2), m2)?;
    let x = a1 * c1 * m2 + a2 * c2 * m1;
    Ok(x % (m1 * m2))
}

/// Whether `parent` is an ancestor of (or equal to) `child` in a
/// heap-indexed binary tree rooted at 0
pub(crate) fn is_parent(parent: usize, child: usize) -> bool {
    if parent == 0 {
        return true;
    }
    let mut child = child;
    while child > parent {
        child = (child - 1) / 2;
    }
    child == parent
}

/// Reverses the low `num_bits` bits of `value`
pub(crate) fn bitreverse(value: usize, num_bits: u32) -> usize {
    let mut res = 0;
    for i in 0..num_bits {
        if value & (1 << i) != 0 {
            res |= 1 << (num_bits - 1 - i);
        }
    }
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::{RandBigInt, RandPrime};
    use num_traits::One;
    use rand::rngs::OsRng;

    #[test]
    fn test_bitreverse() {
        assert_eq!(bitreverse(7, 10), 512 + 256 + 128);
        assert_eq!(bitreverse(16 + 8 + 1, 5), 16 + 2 + 1);
    }

    #[test]
    fn test_modinv() {
        let mut rng = OsRng;
        let n = rng.gen_prime(64);
        for _ in 0..10 {
            let a = rng.gen_biguint_range(&BigUint::one(), &n);
            let inv = modinv(&a, &n).unwrap();
            assert_eq!((a * inv) % &n, BigUint::one());
        }
    }

    #[test]
    fn test_chinese_remainder_theorem() {
        let mut rng = OsRng;
        let p = rng.gen_prime(64);
        let q = rng.gen_prime(64);

        for _ in 0..100 {
            let a1 = rng.gen_biguint_below(&p);
            let a2 = rng.gen_biguint_below(&q);

            let x = chinese_remainder_theorem(&a1, &a2, &p, &q).unwrap();

            assert_eq!(&x % &p, a1);
            assert_eq!(&x % &q, a2);
            assert!(x < &p * &q);
        }
    }
}
