// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! Measures how long modular exponentiation takes as operand width doubles.
//!
//! Each iteration draws three fresh uniform random integers of the same
//! requested bit width, computes base^exponent mod modulus once, and writes
//! two lines to the output: the bit width and the elapsed seconds with four
//! fractional digits. The result of the exponentiation is never inspected;
//! only the timing matters.

use num_bigint::{BigUint, RandBigInt};
use rand::{CryptoRng, RngCore};
use std::io::{self, Write};
use std::ops::RangeInclusive;
use std::time::Instant;

/// Smallest width exponent in the default schedule (2^9 = 512 bits).
pub const MIN_WIDTH_LOG2: u32 = 9;

/// Largest width exponent in the default schedule (2^18 = 262144 bits).
pub const MAX_WIDTH_LOG2: u32 = 18;

/// The full ten-iteration schedule, 512 through 262144 bits.
pub fn default_schedule() -> RangeInclusive<u32> {
    MIN_WIDTH_LOG2..=MAX_WIDTH_LOG2
}

/// Draws the three operands for one iteration: base, exponent, modulus.
///
/// Each is uniform over [0, 2^bits), so the top bit is not necessarily set
/// and a zero modulus is possible in principle; a zero modulus inherits the
/// arithmetic library's behavior (a panic) rather than being guarded here.
pub fn random_operands<R: RngCore + CryptoRng>(
    rng: &mut R,
    bits: u64,
) -> (BigUint, BigUint, BigUint) {
    let base = rng.gen_biguint(bits as usize);
    let exponent = rng.gen_biguint(bits as usize);
    let modulus = rng.gen_biguint(bits as usize);
    (base, exponent, modulus)
}

/// Computes base^exponent mod modulus once and returns the elapsed seconds.
pub fn time_modpow(base: &BigUint, exponent: &BigUint, modulus: &BigUint) -> f64 {
    let start = Instant::now();
    let _result = base.modpow(exponent, modulus);
    start.elapsed().as_secs_f64()
}

/// Runs the measurement loop over `log_widths`, writing two lines per
/// iteration: the width in bits, then the elapsed seconds.
pub fn run<R: RngCore + CryptoRng, W: Write>(
    rng: &mut R,
    out: &mut W,
    log_widths: RangeInclusive<u32>,
) -> io::Result<()> {
    for log_width in log_widths {
        let bits = 1u64 << log_width;
        writeln!(out, "{}", bits)?;
        let (base, exponent, modulus) = random_operands(rng, bits);
        let seconds = time_modpow(&base, &exponent, &modulus);
        writeln!(out, "{:.4}", seconds)?;
    }
    Ok(())
}
