// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! A prototype of Onion ORAM, an oblivious RAM with constant client-side
//! bandwidth blowup.
//!
//! The crate is organized bottom-up:
//! * [`damgard_jurik`] implements the additively homomorphic cryptosystem of
//!   Damgård and Jurik, a generalization of Paillier to moduli of the form
//!   n^(s+1), together with the layered [`damgard_jurik::Payload`] wrapper
//!   the ORAM needs.
//! * [`oram`] is a plaintext tree ORAM with deterministic bit-reversed
//!   eviction, useful on its own for experimenting with the tree logic.
//! * [`onion`] combines the two: the server stores blocks under one onion
//!   layer per tree level and serves accesses through homomorphic selection,
//!   so each access touches a single path without revealing which block on
//!   it was wanted.
//! * [`benchmark`] times the modular exponentiations that dominate the
//!   cryptosystem's cost across a range of operand widths.
//!
//! This is research code and has not been audited; do not use it to protect
//! production data.

#![warn(missing_docs)]

pub mod benchmark;
pub mod damgard_jurik;
pub mod errors;
pub mod onion;
pub mod oram;
mod utils;
