// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! A list of error types which are produced by the cryptosystem and the ORAM
//! layers

use thiserror::Error;

/// The default Result type used in this crate
pub type Result<T> = std::result::Result<T, InternalError>;

/// Represents an error in the manipulation of internal cryptographic data or
/// of the ORAM tree
#[derive(Clone, Eq, PartialEq, Error, Debug)]
#[allow(missing_docs)]
pub enum InternalError {
    #[error("Element is not invertible modulo the given modulus")]
    NotInvertible,
    #[error("Payloads are not defined over the same key and spaces")]
    IncompatiblePayloads,
    #[error("Cannot drop a payload below its plaintext space")]
    AlreadyPlaintext,
    #[error("Block not found on the path")]
    BlockNotFound,
    #[error("Duplicate blocks present for the same address")]
    DuplicateBlock,
    #[error("Not enough room for eviction")]
    EvictionOverflow,
    #[error("Tried to access a block that was never written")]
    UnwrittenBlock,
    #[error("Tree integrity violated: `{0}`")]
    IntegrityViolation(String),
    #[error("Function call contained invalid arguments: `{0}`")]
    InvalidArgument(String),
    #[error("Represents some code assumption that was checked at runtime but failed to be true")]
    InternalInvariantFailed,
}
