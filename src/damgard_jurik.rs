// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! The Damgård–Jurik cryptosystem, a generalization of Paillier encryption
//! to moduli of the form n^{s+1}.
//!
//! A plaintext in Z_{n^s} encrypts to a ciphertext in Z*_{n^{s+1}}, and a
//! ciphertext is itself a valid plaintext one degree up. Repeating this gives
//! the layered ("onion") encryption that the ORAM layers rely on: a value can
//! be lifted through several spaces and later peeled back down, and while
//! encrypted it supports homomorphic addition and selection.

use crate::errors::{InternalError, Result};
use crate::utils::{chinese_remainder_theorem, modinv, modpow};
use num_bigint::{BigUint, RandBigInt, RandPrime};
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::{CryptoRng, RngCore};
use std::cell::RefCell;
use std::collections::HashMap;

/// Public half of a keypair: the modulus `n` and the expansion degree `s`.
///
/// Powers of `n` and inverse factorials are memoized because every lift or
/// drop of an onion layer recomputes them otherwise.
#[derive(Debug)]
pub struct PublicKey {
    n: BigUint,
    s: u32,
    bits: usize,
    n_pows: RefCell<Vec<BigUint>>,
    inv_factorials: RefCell<HashMap<(u32, u32), BigUint>>,
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.n == other.n && self.s == other.s
    }
}

impl Eq for PublicKey {}

impl PublicKey {
    pub(crate) fn new(n: BigUint, s: u32) -> Self {
        let bits = n.bits();
        let n_pows = RefCell::new(vec![BigUint::one(), n.clone()]);
        PublicKey {
            n,
            s,
            bits,
            n_pows,
            inv_factorials: RefCell::new(HashMap::new()),
        }
    }

    /// The modulus n.
    pub fn n(&self) -> &BigUint {
        &self.n
    }

    /// The expansion degree the keypair was generated for.
    pub fn s(&self) -> u32 {
        self.s
    }

    /// Bit length of the modulus.
    pub fn bits(&self) -> usize {
        self.bits
    }

    /// Returns n^i, memoizing every power computed on the way.
    pub(crate) fn n_pow(&self, i: u32) -> BigUint {
        let mut cache = self.n_pows.borrow_mut();
        while cache.len() <= i as usize {
            let next = &cache[cache.len() - 1] * &self.n;
            cache.push(next);
        }
        cache[i as usize].clone()
    }

    /// Returns (i!)^{-1} mod n^j.
    ///
    /// The inverse exists as long as every factor of i! is coprime to n,
    /// which holds whenever i is smaller than both prime factors.
    pub(crate) fn inv_factorial(&self, i: u32, j: u32) -> Result<BigUint> {
        if let Some(cached) = self.inv_factorials.borrow().get(&(i, j)) {
            return Ok(cached.clone());
        }
        let mut factorial = BigUint::one();
        for k in 2..=i {
            factorial *= BigUint::from(k);
        }
        let inv = modinv(&factorial, &self.n_pow(j))?;
        self.inv_factorials
            .borrow_mut()
            .insert((i, j), inv.clone());
        Ok(inv)
    }
}

/// Private half of a keypair: the factorization of `n`.
#[derive(Debug)]
pub struct PrivateKey {
    p: BigUint,
    q: BigUint,
    ds: RefCell<HashMap<u32, BigUint>>,
}

impl PrivateKey {
    pub(crate) fn new(p: BigUint, q: BigUint) -> Self {
        PrivateKey {
            p,
            q,
            ds: RefCell::new(HashMap::new()),
        }
    }

    /// The decryption exponent for degree `s`: the CRT solution of
    /// d = 1 (mod n^s) and d = 0 (mod lambda(n)).
    pub(crate) fn d(&self, pk: &PublicKey, s: u32) -> Result<BigUint> {
        if let Some(cached) = self.ds.borrow().get(&s) {
            return Ok(cached.clone());
        }
        let lambda = (&self.p - BigUint::one()).lcm(&(&self.q - BigUint::one()));
        let d = chinese_remainder_theorem(
            &BigUint::one(),
            &BigUint::zero(),
            &pk.n_pow(s),
            &lambda,
        )?;
        self.ds.borrow_mut().insert(s, d.clone());
        Ok(d)
    }
}

/// Generates a keypair with a `bits`-bit modulus for expansion degree `s`.
pub fn generate_keypair<R: RngCore + CryptoRng>(
    rng: &mut R,
    bits: usize,
    s: u32,
) -> Result<(PublicKey, PrivateKey)> {
    if bits < 8 {
        return Err(InternalError::InvalidArgument(String::from(
            "modulus size is too small",
        )));
    }
    let p = rng.gen_prime(bits / 2);
    let q = loop {
        let q = rng.gen_prime(bits / 2);
        if q != p {
            break q;
        }
    };
    let n = &p * &q;
    Ok((PublicKey::new(n, s), PrivateKey::new(p, q)))
}

/// Encrypts `plaintext` under `pk` at degree `s`, producing a ciphertext in
/// Z*_{n^{s+1}}.
pub fn encrypt<R: RngCore + CryptoRng>(
    pk: &PublicKey,
    s: u32,
    plaintext: &BigUint,
    rng: &mut R,
) -> BigUint {
    let n_s1 = pk.n_pow(s + 1);
    let n_s = pk.n_pow(s);
    let g = pk.n() + BigUint::one();

    // The nonce must be coprime to n^{s+1}. Test-size primes make a
    // collision with a factor of n plausible, so keep the rejection loop.
    let mut r = rng.gen_biguint(pk.bits()) % &n_s1;
    while r.gcd(&n_s1) != BigUint::one() {
        r = rng.gen_biguint(pk.bits()) % &n_s1;
    }

    let g_pow_m = modpow(&g, plaintext, &n_s1);
    let r_pow_n_s = modpow(&r, &n_s, &n_s1);
    (g_pow_m * r_pow_n_s) % n_s1
}

/// Decrypts a degree-`s` ciphertext.
pub fn decrypt(pk: &PublicKey, sk: &PrivateKey, s: u32, ciphertext: &BigUint) -> Result<BigUint> {
    let n = pk.n();
    // L(u) = (u - 1) / n, taken as 0 at u = 0.
    let l = |u: BigUint| -> BigUint {
        if u.is_zero() {
            BigUint::zero()
        } else {
            (u - BigUint::one()) / n
        }
    };

    let c_pow_d = modpow(ciphertext, &sk.d(pk, s)?, &pk.n_pow(s + 1));

    // Recover the plaintext degree by degree, correcting each L(c^d mod
    // n^{j+1}) with the binomial terms of the lower degrees.
    let mut m = BigUint::zero();
    for j in 1..=s {
        let n_j = pk.n_pow(j);
        let mut new_m = l(&c_pow_d % pk.n_pow(j + 1));
        let mut old_m = m.clone();
        for k in 2..=j {
            m = (m + &n_j - BigUint::one()) % &n_j;
            old_m = (old_m * &m) % &n_j;
            let term = (&old_m * pk.n_pow(k - 1)) % &n_j;
            let term = (term * pk.inv_factorial(k, j)?) % &n_j;
            new_m = (new_m + &n_j - term) % &n_j;
        }
        m = new_m;
    }
    Ok(m)
}

/// A value wrapped in zero or more onion layers of encryption.
#[derive(Clone, Debug)]
pub struct Payload<'a> {
    /// The (possibly encrypted) value itself.
    pub payload: BigUint,
    /// Key every layer was produced under.
    pub public_key: &'a PublicKey,
    /// Degree of the innermost (plaintext) space.
    pub plaintext_space: u32,
    /// Degree the payload currently lives at; grows by one per layer.
    pub current_space: u32,
}

impl<'a> Payload<'a> {
    /// Wraps a raw value living at `current_space`.
    pub fn new(
        payload: BigUint,
        public_key: &'a PublicKey,
        plaintext_space: u32,
        current_space: u32,
    ) -> Self {
        Payload {
            payload,
            public_key,
            plaintext_space,
            current_space,
        }
    }

    /// Adds one onion layer.
    pub fn lift_once<R: RngCore + CryptoRng>(&self, rng: &mut R) -> Payload<'a> {
        let encrypted = encrypt(self.public_key, self.current_space, &self.payload, rng);
        Payload::new(
            encrypted,
            self.public_key,
            self.plaintext_space,
            self.current_space + 1,
        )
    }

    /// Adds `k` onion layers.
    pub fn lift_by<R: RngCore + CryptoRng>(&self, k: u32, rng: &mut R) -> Payload<'a> {
        let mut lifted = self.clone();
        for _ in 0..k {
            lifted = lifted.lift_once(rng);
        }
        lifted
    }

    /// Strips one onion layer.
    pub fn drop_once(&self, private_key: &PrivateKey) -> Result<Payload<'a>> {
        if self.current_space <= self.plaintext_space {
            return Err(InternalError::AlreadyPlaintext);
        }
        let decrypted = decrypt(
            self.public_key,
            private_key,
            self.current_space - 1,
            &self.payload,
        )?;
        Ok(Payload::new(
            decrypted,
            self.public_key,
            self.plaintext_space,
            self.current_space - 1,
        ))
    }

    /// Strips `k` onion layers.
    pub fn drop_by(&self, k: u32, private_key: &PrivateKey) -> Result<Payload<'a>> {
        let mut dropped = self.clone();
        for _ in 0..k {
            dropped = dropped.drop_once(private_key)?;
        }
        Ok(dropped)
    }

    /// Strips every layer, returning the payload at its plaintext space.
    pub fn get_plaintext(&self, private_key: &PrivateKey) -> Result<Payload<'a>> {
        self.drop_by(self.current_space - self.plaintext_space, private_key)
    }
}

/// Adds two payloads under the encryption, layer for layer.
pub fn homomorphic_add<'a>(x: &Payload<'a>, y: &Payload<'a>) -> Result<Payload<'a>> {
    if x.public_key != y.public_key
        || x.plaintext_space != y.plaintext_space
        || x.current_space != y.current_space
    {
        return Err(InternalError::IncompatiblePayloads);
    }
    let modulus = x.public_key.n_pow(x.current_space);
    let payload = (&x.payload * &y.payload) % modulus;
    Ok(Payload::new(
        payload,
        x.public_key,
        x.plaintext_space,
        x.current_space,
    ))
}

/// Multiplies the value hidden in `hidden` by the bit encrypted in
/// `selector`, rerandomizing the result. Costs one extra onion layer.
pub fn homomorphic_scalar_multiply<'a, R: RngCore + CryptoRng>(
    hidden: &Payload<'a>,
    selector: &Payload<'a>,
    rng: &mut R,
) -> Payload<'a> {
    let public = hidden.public_key;
    let modulus_plain = public.n_pow(selector.current_space - 1);
    let modulus_cipher = public.n_pow(selector.current_space);

    let selected = modpow(&selector.payload, &hidden.payload, &modulus_cipher);
    let r = rng.gen_biguint(public.bits()) % &modulus_cipher;
    let r = modpow(&r, &modulus_plain, &modulus_cipher);
    let rerandomized = (selected * r) % modulus_cipher;

    Payload::new(
        rerandomized,
        hidden.public_key,
        hidden.plaintext_space,
        hidden.current_space + 1,
    )
}

/// Obliviously picks out the payload whose one-hot selector encrypts 1.
///
/// Payloads are lifted to a common number of onion layers first; every
/// selector must carry exactly one layer above its plaintext space.
pub fn homomorphic_select<'a, R: RngCore + CryptoRng>(
    payloads: Vec<Payload<'a>>,
    selectors: &[Payload<'a>],
    rng: &mut R,
) -> Result<Payload<'a>> {
    if payloads.is_empty() || payloads.len() != selectors.len() {
        return Err(InternalError::InvalidArgument(String::from(
            "select requires matching, non-empty payloads and selectors",
        )));
    }
    if payloads
        .iter()
        .any(|p| p.plaintext_space != payloads[0].plaintext_space)
    {
        return Err(InternalError::IncompatiblePayloads);
    }
    if selectors
        .iter()
        .any(|sel| sel.current_space - sel.plaintext_space != 1)
    {
        return Err(InternalError::IncompatiblePayloads);
    }

    let max_onion_layers = payloads
        .iter()
        .map(|p| p.current_space - p.plaintext_space)
        .max()
        .ok_or(InternalError::InternalInvariantFailed)?;

    let mut merged: Option<Payload> = None;
    for (payload, selector) in payloads.into_iter().zip(selectors) {
        let delta = max_onion_layers - (payload.current_space - payload.plaintext_space);
        let lifted = payload.lift_by(delta, rng);
        let product = homomorphic_scalar_multiply(&lifted, selector, rng);
        merged = Some(match merged {
            None => product,
            Some(acc) => homomorphic_add(&acc, &product)?,
        });
    }
    merged.ok_or(InternalError::InternalInvariantFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;
    use rand::Rng;

    #[test]
    fn test_encrypt_decrypt() {
        let mut rng = OsRng;
        let (public, private) = generate_keypair(&mut rng, 128, 8).unwrap();
        for _ in 0..10 {
            let plaintext = BigUint::from(rng.gen_range(0u32..100_000));
            let ciphertext = encrypt(&public, 8, &plaintext, &mut rng);
            let deciphered = decrypt(&public, &private, 8, &ciphertext).unwrap();
            assert_eq!(deciphered, plaintext);
        }
    }

    #[test]
    fn test_homomorphic_operation() {
        let mut rng = OsRng;
        let (public, private) = generate_keypair(&mut rng, 128, 8).unwrap();
        let e12851 = encrypt(&public, 8, &BigUint::from(12851u32), &mut rng);
        let e21585 = encrypt(&public, 8, &BigUint::from(21585u32), &mut rng);
        let e34436 = (e12851 * e21585) % public.n_pow(9);
        assert_eq!(
            BigUint::from(34436u32),
            decrypt(&public, &private, 8, &e34436).unwrap()
        );
    }

    #[test]
    fn test_homomorphic_payload_add() {
        let mut rng = OsRng;
        let pspace = 10;
        let (public, private) = generate_keypair(&mut rng, 128, pspace).unwrap();
        let a = Payload::new(BigUint::from(12851u32), &public, pspace, pspace)
            .lift_once(&mut rng);
        let b = Payload::new(BigUint::from(21585u32), &public, pspace, pspace)
            .lift_once(&mut rng);
        let c = homomorphic_add(&a, &b)
            .unwrap()
            .get_plaintext(&private)
            .unwrap();
        assert_eq!(c.payload, BigUint::from(12851u32 + 21585));
    }

    #[test]
    fn test_payload_lift_drop_once() {
        let mut rng = OsRng;
        let plaintext_space = 5;
        let (public, private) = generate_keypair(&mut rng, 128, plaintext_space).unwrap();
        let data = Payload::new(
            BigUint::from(1337u32),
            &public,
            plaintext_space,
            plaintext_space,
        );
        let encrypted = data.lift_by(1, &mut rng);
        let decrypted = encrypted.drop_by(1, &private).unwrap();
        assert_eq!(decrypted.payload, BigUint::from(1337u32));
    }

    #[test]
    fn test_payload_lift_drop_multiple_times() {
        let mut rng = OsRng;
        let pspace = 5;
        let (public, private) = generate_keypair(&mut rng, 128, pspace).unwrap();
        for _ in 0..4 {
            let num = BigUint::from(rng.gen_range(0u32..100_000));
            let data = Payload::new(num.clone(), &public, pspace, pspace);
            assert_eq!(data.current_space, pspace);
            assert_eq!(data.plaintext_space, pspace);

            let by = rng.gen_range(0u32..=10);
            let encrypted = data.lift_by(by, &mut rng);
            assert_eq!(encrypted.current_space, pspace + by);
            assert_eq!(encrypted.plaintext_space, pspace);

            let decrypted = encrypted.drop_by(by, &private).unwrap();
            assert_eq!(decrypted.current_space, pspace);
            assert_eq!(decrypted.plaintext_space, pspace);
            assert_eq!(decrypted.payload, num);
        }
    }

    #[test]
    fn test_homomorphic_scalar_multiply_one() {
        let mut rng = OsRng;
        let base_level = 2;
        let onion_level = 4;
        let (public, private) = generate_keypair(&mut rng, 128, onion_level).unwrap();
        let hidden = Payload::new(BigUint::from(444u32), &public, base_level, base_level)
            .lift_by(onion_level, &mut rng);
        let selector = Payload::new(
            BigUint::one(),
            &public,
            onion_level + base_level,
            onion_level + base_level,
        )
        .lift_by(1, &mut rng);
        let res = homomorphic_scalar_multiply(&hidden, &selector, &mut rng);
        assert_eq!(
            res.get_plaintext(&private).unwrap().payload,
            BigUint::from(444u32)
        );
    }

    #[test]
    fn test_homomorphic_scalar_multiply_zero() {
        let mut rng = OsRng;
        let base_level = 3;
        let onion_level = 4;
        let (public, private) = generate_keypair(&mut rng, 128, onion_level).unwrap();
        let hidden = Payload::new(BigUint::from(444u32), &public, base_level, base_level)
            .lift_by(onion_level, &mut rng);
        let selector = Payload::new(
            BigUint::zero(),
            &public,
            onion_level + base_level,
            onion_level + base_level,
        )
        .lift_by(1, &mut rng);
        let res = homomorphic_scalar_multiply(&hidden, &selector, &mut rng);
        assert_eq!(res.get_plaintext(&private).unwrap().payload, BigUint::zero());
    }

    #[test]
    fn test_homomorphic_select() {
        let mut rng = OsRng;
        let base_level = 2;
        let onion_layers = 6;
        let (public, private) = generate_keypair(&mut rng, 128, base_level).unwrap();
        let max_onion_layers = onion_layers + base_level;

        let nums = [6969u32, 333, 1337, 3512];
        for i in 0..nums.len() {
            let enc: Vec<Payload> = nums
                .iter()
                .map(|&x| {
                    Payload::new(BigUint::from(x), &public, base_level, base_level)
                        .lift_by(onion_layers, &mut rng)
                })
                .collect();
            let selectors: Vec<Payload> = (0..nums.len())
                .map(|j| {
                    let bit = if i == j { BigUint::one() } else { BigUint::zero() };
                    Payload::new(bit, &public, max_onion_layers, max_onion_layers)
                        .lift_once(&mut rng)
                })
                .collect();
            let res = homomorphic_select(enc, &selectors, &mut rng).unwrap();
            assert_eq!(
                res.get_plaintext(&private).unwrap().payload,
                BigUint::from(nums[i])
            );
        }
    }
}
