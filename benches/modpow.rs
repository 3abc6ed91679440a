// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

#[macro_use]
extern crate criterion;

use criterion::Criterion;

use num_bigint::RandBigInt;
use rand::rngs::OsRng;

fn base(c: &mut Criterion) {
    let num_bits_in_bn: usize = 2048;

    let mut rng = OsRng;
    let mut a = rng.gen_biguint(num_bits_in_bn);
    let e = rng.gen_biguint(num_bits_in_bn);
    let n = rng.gen_biguint(num_bits_in_bn);

    c.bench_function(&format!("base ({} bits)", num_bits_in_bn), move |b| {
        b.iter(|| {
            a = a.modpow(&e, &n);
        })
    });
}

criterion_group!(modpow_benches, base);
criterion_main!(modpow_benches);
