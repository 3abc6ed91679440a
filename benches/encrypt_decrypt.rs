// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

#[macro_use]
extern crate criterion;

use criterion::Criterion;

use num_bigint::RandBigInt;
use num_traits::Pow;
use onion_oram::damgard_jurik::{decrypt, encrypt, generate_keypair};
use rand::rngs::OsRng;

fn encrypt_decrypt(c: &mut Criterion) {
    let mut rng = OsRng;

    for log_n in 8..=11 {
        let bits = 1usize << log_n;
        for s in 1..=5u32 {
            let (public, private) = generate_keypair(&mut rng, bits, s).unwrap();
            let message = rng.gen_biguint_below(&public.n().pow(s));

            c.bench_function(&format!("encrypt ({} bit modulus, s = {})", bits, s), |b| {
                b.iter(|| encrypt(&public, s, &message, &mut rng))
            });

            let ciphertext = encrypt(&public, s, &message, &mut rng);
            c.bench_function(&format!("decrypt ({} bit modulus, s = {})", bits, s), |b| {
                b.iter(|| decrypt(&public, &private, s, &ciphertext).unwrap())
            });
        }
    }
}

criterion_group!(
    name = encryption_benches;
    config = Criterion::default().sample_size(10);
    targets = encrypt_decrypt
);
criterion_main!(encryption_benches);
