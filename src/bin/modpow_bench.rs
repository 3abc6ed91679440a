// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! Prints modular exponentiation timings for operand widths from 512 to
//! 262144 bits, two lines per width: the width in bits, then the elapsed
//! seconds with four fractional digits.

use clap::Parser;
use onion_oram::benchmark;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::io;

#[derive(Parser, Debug)]
#[clap(name = "modpow-bench")]
struct Args {
    /// Seed for the operand generator. Omit to draw operands from entropy.
    #[clap(long)]
    seed: Option<u64>,
}

fn main() -> io::Result<()> {
    let args = Args::parse();
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let stdout = io::stdout();
    benchmark::run(&mut rng, &mut stdout.lock(), benchmark::default_schedule())
}
