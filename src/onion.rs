// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! Onion ORAM: the tree ORAM with server-side storage wrapped in layered
//! Damgård–Jurik encryption.
//!
//! Blocks are split into chunks of big integers. A block stored at depth `d`
//! carries `d + 1` onion layers above the root plaintext space, so the server
//! can homomorphically select a block off a path (and push blocks down a
//! level during eviction) without ever seeing which slot was touched. The
//! [`ServerWrapper`] trait is the boundary the client drives; the encrypted
//! implementation does the real work, while the plaintext one exists to test
//! the client logic in isolation.

use crate::damgard_jurik::{homomorphic_select, Payload, PrivateKey, PublicKey};
use crate::errors::{InternalError, Result};
use crate::oram::Operation;
use crate::utils::{bitreverse, is_parent};
use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use rand::{CryptoRng, Rng, RngCore};
use std::collections::HashMap;

/// Number of onion layers carried by a block stored in `bucket_id`: one for
/// the root plus one per level of depth.
fn onion_layers(bucket_id: usize) -> u32 {
    let mut at = bucket_id;
    let mut layers = 1;
    while at > 0 {
        at = (at - 1) / 2;
        layers += 1;
    }
    layers
}

/// A block as the client sees it: plaintext metadata and chunk values.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PlainBlock {
    /// Logical address of the block.
    pub address: usize,
    /// Leaf whose path the block must stay on.
    pub leaf_target: usize,
    /// The block's data, one big integer per chunk.
    pub chunks: Vec<BigUint>,
}

/// A block as the server stores it. For the encrypted wrapper the metadata
/// and chunks are ciphertexts; dummy-ness stays public either way.
#[derive(Clone, Debug, Default)]
struct StoredBlock {
    address: Option<BigUint>,
    leaf_target: BigUint,
    chunks: Vec<BigUint>,
}

impl StoredBlock {
    fn is_dummy(&self) -> bool {
        self.address.is_none()
    }

    fn invalidate(&mut self) {
        self.address = None;
        self.leaf_target = BigUint::zero();
        self.chunks.clear();
    }
}

#[derive(Clone, Debug)]
struct Bucket {
    blocks: Vec<StoredBlock>,
}

/// Raw bucket-tree storage shared by both wrapper implementations.
#[derive(Debug)]
struct Tree {
    total_levels: u32,
    blocks_per_bucket: usize,
    chunks_per_block: usize,
    buckets: Vec<Bucket>,
}

impl Tree {
    fn new(total_levels: u32, blocks_per_bucket: usize, chunks_per_block: usize) -> Self {
        let total_buckets = (1usize << (total_levels + 1)) - 1;
        let buckets = (0..total_buckets)
            .map(|_| Bucket {
                blocks: vec![StoredBlock::default(); blocks_per_bucket],
            })
            .collect();
        Tree {
            total_levels,
            blocks_per_bucket,
            chunks_per_block,
            buckets,
        }
    }

    /// Bucket ids on the path from the root down to leaf `target`.
    fn path_to_leaf(&self, target: usize) -> Vec<usize> {
        let mut at = target + (1 << self.total_levels) - 1;
        let mut buckets = vec![];
        for _ in 0..=self.total_levels {
            buckets.push(at);
            at = at.saturating_sub(1) / 2;
        }
        buckets.reverse();
        buckets
    }

    fn get_addresses(&self, target: usize) -> (Vec<usize>, Vec<Vec<Option<BigUint>>>) {
        let buckets = self.path_to_leaf(target);
        let addresses = buckets
            .iter()
            .map(|&b| {
                self.buckets[b]
                    .blocks
                    .iter()
                    .map(|block| block.address.clone())
                    .collect()
            })
            .collect();
        (buckets, addresses)
    }

    fn set_addresses(&mut self, buckets: &[usize], addresses: Vec<Vec<Option<BigUint>>>) {
        for (&bucket, slots) in buckets.iter().zip(addresses) {
            for (slot, address) in slots.into_iter().enumerate() {
                self.buckets[bucket].blocks[slot].address = address;
            }
        }
    }
}

/// Storage interface the ORAM client drives. Addresses and leaf targets
/// cross this boundary in plaintext; implementations decide how they are
/// stored server-side.
pub trait ServerWrapper {
    /// Number of levels below the root.
    fn total_levels(&self) -> u32;

    /// Capacity of each bucket.
    fn blocks_per_bucket(&self) -> usize;

    /// Number of chunks in a full block.
    fn chunks_per_block(&self) -> usize;

    /// Bucket ids and per-slot addresses along the path to `target`, root
    /// first. Dummy slots read as `None`.
    fn get_addresses(&self, target: usize) -> Result<(Vec<usize>, Vec<Vec<Option<usize>>>)>;

    /// Overwrites the address metadata along a previously fetched path.
    fn set_addresses(&mut self, buckets: &[usize], addresses: &[Vec<Option<usize>>])
        -> Result<()>;

    /// Returns the chunks of the single block picked out by the 0/1 select
    /// vector, which must cover exactly the given buckets.
    fn select_block(
        &mut self,
        bucket_ids: &[usize],
        select_vector: &[Vec<u8>],
    ) -> Result<Vec<BigUint>>;

    /// Whether the slot holds no real block.
    fn is_dummy(&self, bucket_id: usize, block_id: usize) -> bool;

    /// Address and leaf target of a non-dummy slot.
    fn get_metadata(&self, bucket_id: usize, block_id: usize) -> Result<(usize, usize)>;

    /// Marks a slot as dummy.
    fn invalidate(&mut self, bucket_id: usize, block_id: usize);

    /// Stores a block into a slot.
    fn set_block(&mut self, bucket_id: usize, block_id: usize, block: PlainBlock) -> Result<()>;

    /// Reads a block back out of a slot with all layers removed.
    fn get_block(&self, bucket_id: usize, block_id: usize) -> Result<PlainBlock>;
}

/// Passthrough wrapper storing everything in the clear. Useful for testing
/// the client's tree logic without paying for the cryptography.
#[derive(Debug)]
pub struct PlainServerWrapper {
    tree: Tree,
}

impl PlainServerWrapper {
    /// Builds an all-dummy tree of the given dimensions.
    pub fn new(total_levels: u32, blocks_per_bucket: usize, chunks_per_block: usize) -> Self {
        PlainServerWrapper {
            tree: Tree::new(total_levels, blocks_per_bucket, chunks_per_block),
        }
    }
}

fn to_usize(value: &BigUint) -> Result<usize> {
    value.to_usize().ok_or(InternalError::InternalInvariantFailed)
}

/// Checks that every select entry is 0 or 1 and that exactly one is set.
fn validate_select_vector(select_vector: &[Vec<u8>], blocks_per_bucket: usize) -> Result<()> {
    let mut total = 0usize;
    for bucket_flags in select_vector {
        if bucket_flags.len() != blocks_per_bucket {
            return Err(InternalError::InvalidArgument(String::from(
                "select vector does not match the bucket capacity",
            )));
        }
        for &flag in bucket_flags {
            if flag > 1 {
                return Err(InternalError::InvalidArgument(String::from(
                    "select vector entries must be 0 or 1",
                )));
            }
            total += flag as usize;
        }
    }
    if total != 1 {
        return Err(InternalError::InvalidArgument(String::from(
            "select vector must pick exactly one block",
        )));
    }
    Ok(())
}

impl ServerWrapper for PlainServerWrapper {
    fn total_levels(&self) -> u32 {
        self.tree.total_levels
    }

    fn blocks_per_bucket(&self) -> usize {
        self.tree.blocks_per_bucket
    }

    fn chunks_per_block(&self) -> usize {
        self.tree.chunks_per_block
    }

    fn get_addresses(&self, target: usize) -> Result<(Vec<usize>, Vec<Vec<Option<usize>>>)> {
        let (buckets, addresses) = self.tree.get_addresses(target);
        let plain = addresses
            .into_iter()
            .map(|slots| {
                slots
                    .into_iter()
                    .map(|address| address.as_ref().map(to_usize).transpose())
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;
        Ok((buckets, plain))
    }

    fn set_addresses(
        &mut self,
        buckets: &[usize],
        addresses: &[Vec<Option<usize>>],
    ) -> Result<()> {
        let stored = addresses
            .iter()
            .map(|slots| {
                slots
                    .iter()
                    .map(|address| address.map(BigUint::from))
                    .collect()
            })
            .collect();
        self.tree.set_addresses(buckets, stored);
        Ok(())
    }

    fn select_block(
        &mut self,
        bucket_ids: &[usize],
        select_vector: &[Vec<u8>],
    ) -> Result<Vec<BigUint>> {
        if select_vector.len() != bucket_ids.len() {
            return Err(InternalError::InvalidArgument(String::from(
                "select vector does not match the bucket list",
            )));
        }
        validate_select_vector(select_vector, self.tree.blocks_per_bucket)?;

        for (i, &bucket_id) in bucket_ids.iter().enumerate() {
            for (slot, &flag) in select_vector[i].iter().enumerate() {
                if flag == 1 {
                    let block = &self.tree.buckets[bucket_id].blocks[slot];
                    if block.is_dummy() {
                        return Err(InternalError::BlockNotFound);
                    }
                    return Ok(block.chunks.clone());
                }
            }
        }
        Err(InternalError::BlockNotFound)
    }

    fn is_dummy(&self, bucket_id: usize, block_id: usize) -> bool {
        self.tree.buckets[bucket_id].blocks[block_id].is_dummy()
    }

    fn get_metadata(&self, bucket_id: usize, block_id: usize) -> Result<(usize, usize)> {
        let block = &self.tree.buckets[bucket_id].blocks[block_id];
        let address = block.address.as_ref().ok_or(InternalError::BlockNotFound)?;
        Ok((to_usize(address)?, to_usize(&block.leaf_target)?))
    }

    fn invalidate(&mut self, bucket_id: usize, block_id: usize) {
        self.tree.buckets[bucket_id].blocks[block_id].invalidate();
    }

    fn set_block(&mut self, bucket_id: usize, block_id: usize, block: PlainBlock) -> Result<()> {
        self.tree.buckets[bucket_id].blocks[block_id] = StoredBlock {
            address: Some(BigUint::from(block.address)),
            leaf_target: BigUint::from(block.leaf_target),
            chunks: block.chunks,
        };
        Ok(())
    }

    fn get_block(&self, bucket_id: usize, block_id: usize) -> Result<PlainBlock> {
        let (address, leaf_target) = self.get_metadata(bucket_id, block_id)?;
        Ok(PlainBlock {
            address,
            leaf_target,
            chunks: self.tree.buckets[bucket_id].blocks[block_id].chunks.clone(),
        })
    }
}

/// Wrapper storing all metadata and chunks as Damgård–Jurik ciphertexts.
///
/// This prototype keeps both halves of the keypair here: the wrapper models
/// the client's cryptographic view of the server, not a deployable server.
/// Chunks in a bucket at depth `d` live `d + 1` layers above
/// `root_plain_space`; address metadata always carries a single degree-1
/// layer.
#[derive(Debug)]
pub struct EncServerWrapper<R: RngCore + CryptoRng> {
    tree: Tree,
    public_key: PublicKey,
    private_key: PrivateKey,
    root_plain_space: u32,
    rng: R,
}

impl<R: RngCore + CryptoRng> EncServerWrapper<R> {
    /// Builds an all-dummy encrypted tree of the given dimensions.
    pub fn new(
        total_levels: u32,
        blocks_per_bucket: usize,
        chunks_per_block: usize,
        root_plain_space: u32,
        public_key: PublicKey,
        private_key: PrivateKey,
        rng: R,
    ) -> Self {
        EncServerWrapper {
            tree: Tree::new(total_levels, blocks_per_bucket, chunks_per_block),
            public_key,
            private_key,
            root_plain_space,
            rng,
        }
    }

    fn seal_metadata(&mut self, value: usize) -> BigUint {
        Payload::new(BigUint::from(value), &self.public_key, 1, 1)
            .lift_once(&mut self.rng)
            .payload
    }

    fn open_metadata(&self, sealed: &BigUint) -> Result<usize> {
        let plain = Payload::new(sealed.clone(), &self.public_key, 1, 2)
            .get_plaintext(&self.private_key)?;
        to_usize(&plain.payload)
    }
}

impl<R: RngCore + CryptoRng> ServerWrapper for EncServerWrapper<R> {
    fn total_levels(&self) -> u32 {
        self.tree.total_levels
    }

    fn blocks_per_bucket(&self) -> usize {
        self.tree.blocks_per_bucket
    }

    fn chunks_per_block(&self) -> usize {
        self.tree.chunks_per_block
    }

    fn get_addresses(&self, target: usize) -> Result<(Vec<usize>, Vec<Vec<Option<usize>>>)> {
        let (buckets, addresses) = self.tree.get_addresses(target);
        let mut plain = Vec::with_capacity(addresses.len());
        for slots in addresses {
            let mut bucket_plain = Vec::with_capacity(slots.len());
            for address in slots {
                bucket_plain.push(match address {
                    None => None,
                    Some(sealed) => Some(self.open_metadata(&sealed)?),
                });
            }
            plain.push(bucket_plain);
        }
        Ok((buckets, plain))
    }

    fn set_addresses(
        &mut self,
        buckets: &[usize],
        addresses: &[Vec<Option<usize>>],
    ) -> Result<()> {
        let mut sealed = Vec::with_capacity(addresses.len());
        for slots in addresses {
            let mut bucket_sealed = Vec::with_capacity(slots.len());
            for address in slots {
                bucket_sealed.push(address.map(|a| self.seal_metadata(a)));
            }
            sealed.push(bucket_sealed);
        }
        self.tree.set_addresses(buckets, sealed);
        Ok(())
    }

    fn select_block(
        &mut self,
        bucket_ids: &[usize],
        select_vector: &[Vec<u8>],
    ) -> Result<Vec<BigUint>> {
        if select_vector.len() != bucket_ids.len() {
            return Err(InternalError::InvalidArgument(String::from(
                "select vector does not match the bucket list",
            )));
        }
        validate_select_vector(select_vector, self.tree.blocks_per_bucket)?;

        let deepest = bucket_ids
            .iter()
            .map(|&b| onion_layers(b))
            .max()
            .ok_or(InternalError::InternalInvariantFailed)?;
        let max_onion_layers = deepest + self.root_plain_space;

        // One selector per non-dummy slot, in bucket-major order; the chunk
        // loop below must walk the slots in the same order.
        let mut selectors = vec![];
        for (i, &bucket_id) in bucket_ids.iter().enumerate() {
            for (slot, &flag) in select_vector[i].iter().enumerate() {
                if self.tree.buckets[bucket_id].blocks[slot].is_dummy() {
                    continue;
                }
                let selector = Payload::new(
                    BigUint::from(flag),
                    &self.public_key,
                    max_onion_layers,
                    max_onion_layers,
                )
                .lift_once(&mut self.rng);
                selectors.push(selector);
            }
        }

        let mut selected_chunks = Vec::with_capacity(self.tree.chunks_per_block);
        for c in 0..self.tree.chunks_per_block {
            let mut payloads = vec![];
            for &bucket_id in bucket_ids {
                let layers = onion_layers(bucket_id);
                for block in &self.tree.buckets[bucket_id].blocks {
                    if block.is_dummy() {
                        continue;
                    }
                    payloads.push(Payload::new(
                        block.chunks[c].clone(),
                        &self.public_key,
                        self.root_plain_space,
                        self.root_plain_space + layers,
                    ));
                }
            }
            let selected = homomorphic_select(payloads, &selectors, &mut self.rng)?;
            selected_chunks.push(selected.get_plaintext(&self.private_key)?.payload);
        }
        Ok(selected_chunks)
    }

    fn is_dummy(&self, bucket_id: usize, block_id: usize) -> bool {
        self.tree.buckets[bucket_id].blocks[block_id].is_dummy()
    }

    fn get_metadata(&self, bucket_id: usize, block_id: usize) -> Result<(usize, usize)> {
        let block = &self.tree.buckets[bucket_id].blocks[block_id];
        let address = block.address.as_ref().ok_or(InternalError::BlockNotFound)?;
        Ok((
            self.open_metadata(address)?,
            self.open_metadata(&block.leaf_target)?,
        ))
    }

    fn invalidate(&mut self, bucket_id: usize, block_id: usize) {
        self.tree.buckets[bucket_id].blocks[block_id].invalidate();
    }

    fn set_block(&mut self, bucket_id: usize, block_id: usize, block: PlainBlock) -> Result<()> {
        if block.chunks.len() != self.tree.chunks_per_block {
            return Err(InternalError::InvalidArgument(String::from(
                "encrypted blocks must carry a full chunk vector",
            )));
        }

        let layers = onion_layers(bucket_id);
        let address = self.seal_metadata(block.address);
        let leaf_target = self.seal_metadata(block.leaf_target);
        let mut chunks = Vec::with_capacity(block.chunks.len());
        for chunk in block.chunks {
            let lifted = Payload::new(
                chunk,
                &self.public_key,
                self.root_plain_space,
                self.root_plain_space,
            )
            .lift_by(layers, &mut self.rng);
            chunks.push(lifted.payload);
        }

        self.tree.buckets[bucket_id].blocks[block_id] = StoredBlock {
            address: Some(address),
            leaf_target,
            chunks,
        };
        Ok(())
    }

    fn get_block(&self, bucket_id: usize, block_id: usize) -> Result<PlainBlock> {
        let (address, leaf_target) = self.get_metadata(bucket_id, block_id)?;
        let layers = onion_layers(bucket_id);

        let mut chunks = vec![];
        for chunk in &self.tree.buckets[bucket_id].blocks[block_id].chunks {
            let plain = Payload::new(
                chunk.clone(),
                &self.public_key,
                self.root_plain_space,
                self.root_plain_space + layers,
            )
            .get_plaintext(&self.private_key)?;
            chunks.push(plain.payload);
        }
        Ok(PlainBlock {
            address,
            leaf_target,
            chunks,
        })
    }
}

/// The trusted client: position map, lazy initialization, and eviction
/// schedule, all driven through a [`ServerWrapper`].
#[derive(Debug)]
pub struct Client<W: ServerWrapper, R: RngCore + CryptoRng> {
    total_levels: u32,
    total_blocks: usize,
    total_leaf_buckets: usize,
    blocks_per_bucket: usize,
    chunks_per_block: usize,
    eviction_period: Option<usize>,
    server_wrapper: W,
    eviction_counter: usize,
    next_evicted_path: usize,
    position_map: Vec<Option<usize>>,
    rng: R,
}

impl<W: ServerWrapper, R: RngCore + CryptoRng> Client<W, R> {
    /// Wraps a server holding `total_blocks` addressable blocks. With an
    /// eviction period of `None` the root bucket is never evicted, which
    /// only suits short demonstration workloads.
    pub fn new(
        server_wrapper: W,
        total_blocks: usize,
        eviction_period: Option<usize>,
        rng: R,
    ) -> Result<Self> {
        if let Some(period) = eviction_period {
            if period == 0 || period > server_wrapper.blocks_per_bucket() {
                return Err(InternalError::InvalidArgument(String::from(
                    "eviction period must be between 1 and the bucket capacity",
                )));
            }
        }

        let total_levels = server_wrapper.total_levels();
        Ok(Client {
            total_levels,
            total_blocks,
            total_leaf_buckets: 1 << total_levels,
            blocks_per_bucket: server_wrapper.blocks_per_bucket(),
            chunks_per_block: server_wrapper.chunks_per_block(),
            eviction_period,
            server_wrapper,
            eviction_counter: 0,
            next_evicted_path: 0,
            position_map: vec![None; total_blocks],
            rng,
        })
    }

    /// Places a never-written block into a random free non-root slot with a
    /// consistent leaf target and all-zero chunks.
    fn initialize_block(&mut self, address: usize) -> Result<()> {
        loop {
            let bucket_id = self.rng.gen_range(1..self.total_leaf_buckets * 2 - 1);
            let slot = self.rng.gen_range(0..self.blocks_per_bucket);
            if !self.server_wrapper.is_dummy(bucket_id, slot) {
                continue;
            }
            let mut target = bucket_id;
            while target * 2 + 2 < self.total_leaf_buckets * 2 - 1 {
                target = target * 2 + self.rng.gen_range(1..=2);
            }
            target -= self.total_leaf_buckets - 1;

            self.server_wrapper.set_block(
                bucket_id,
                slot,
                PlainBlock {
                    address,
                    leaf_target: target,
                    chunks: vec![BigUint::zero(); self.chunks_per_block],
                },
            )?;
            self.position_map[address] = Some(target);
            return Ok(());
        }
    }

    /// Reads or writes one block. A write to a never-written address first
    /// initializes it; a read of one is an error. Returns the block's chunks
    /// on a read.
    pub fn access(
        &mut self,
        address: usize,
        operation: Operation,
        new_chunks: Option<Vec<BigUint>>,
    ) -> Result<Option<Vec<BigUint>>> {
        if address >= self.total_blocks {
            return Err(InternalError::InvalidArgument(String::from(
                "address is out of range",
            )));
        }
        if self.position_map[address].is_none() && operation == Operation::Write {
            self.initialize_block(address)?;
        }
        let leaf_target = self.position_map[address].ok_or(InternalError::UnwrittenBlock)?;

        let new_leaf_target = self.rng.gen_range(0..self.total_leaf_buckets);
        self.position_map[address] = Some(new_leaf_target);

        let (bucket_ids, mut addresses) = self.server_wrapper.get_addresses(leaf_target)?;

        // Build the one-hot selection while checking the path for duplicates.
        let mut select_vector = vec![vec![0u8; self.blocks_per_bucket]; bucket_ids.len()];
        let mut counter: HashMap<usize, usize> = HashMap::new();
        let mut matches = 0;
        for i in 0..addresses.len() {
            for j in 0..self.blocks_per_bucket {
                if let Some(stored) = addresses[i][j] {
                    let seen = counter.entry(stored).or_insert(0);
                    *seen += 1;
                    if *seen > 1 {
                        return Err(InternalError::DuplicateBlock);
                    }
                    if stored == address {
                        select_vector[i][j] = 1;
                        addresses[i][j] = None;
                        matches += 1;
                    }
                }
            }
        }
        if matches != 1 {
            return Err(InternalError::BlockNotFound);
        }

        let mut chunks = self.server_wrapper.select_block(&bucket_ids, &select_vector)?;
        if operation == Operation::Write {
            chunks = new_chunks.ok_or_else(|| {
                InternalError::InvalidArgument(String::from("write requires new chunks"))
            })?;
        }

        // Rewriting the path metadata retires the old copy of the block.
        self.server_wrapper.set_addresses(&bucket_ids, &addresses)?;

        self.server_wrapper.set_block(
            0,
            self.eviction_counter,
            PlainBlock {
                address,
                leaf_target: new_leaf_target,
                chunks: chunks.clone(),
            },
        )?;

        self.eviction_counter += 1;
        if Some(self.eviction_counter) == self.eviction_period {
            self.eviction_counter = 0;
            let path = bitreverse(self.next_evicted_path, self.total_levels);
            self.evict_along_path(path)?;
            self.next_evicted_path += 1;
            if self.next_evicted_path >= self.total_blocks {
                self.next_evicted_path -= self.total_blocks;
            }
        }

        match operation {
            Operation::Read => Ok(Some(chunks)),
            Operation::Write => Ok(None),
        }
    }

    /// Moves every block in `source` one level down, towards its leaf
    /// target, using a single-block homomorphic select per move.
    fn push(&mut self, source: usize) -> Result<()> {
        let children = [source * 2 + 1, source * 2 + 2];
        let mut next_index = [0usize, 0usize];

        for block_index in 0..self.blocks_per_bucket {
            if self.server_wrapper.is_dummy(source, block_index) {
                continue;
            }
            let (address, bucket_leaf_target) =
                self.server_wrapper.get_metadata(source, block_index)?;
            let target = (1 << self.total_levels) - 1 + bucket_leaf_target;
            let goes_to = usize::from(!is_parent(children[0], target));

            while next_index[goes_to] < self.blocks_per_bucket
                && !self
                    .server_wrapper
                    .is_dummy(children[goes_to], next_index[goes_to])
            {
                next_index[goes_to] += 1;
            }
            if next_index[goes_to] == self.blocks_per_bucket {
                return Err(InternalError::EvictionOverflow);
            }

            let buckets = [source, children[goes_to]];
            let mut select_vector = vec![vec![0u8; self.blocks_per_bucket]; 2];
            select_vector[0][block_index] = 1;
            let chunks = self.server_wrapper.select_block(&buckets, &select_vector)?;

            self.server_wrapper.set_block(
                children[goes_to],
                next_index[goes_to],
                PlainBlock {
                    address,
                    leaf_target: bucket_leaf_target,
                    chunks,
                },
            )?;
            next_index[goes_to] += 1;
            self.server_wrapper.invalidate(source, block_index);
        }
        Ok(())
    }

    fn evict_along_path(&mut self, leaf_target: usize) -> Result<()> {
        let mut at = leaf_target + (1 << self.total_levels) - 1;
        let mut nodes_along_path = vec![];
        for _ in 0..=self.total_levels {
            nodes_along_path.push(at);
            at = at.saturating_sub(1) / 2;
        }
        nodes_along_path.reverse();

        for &source in &nodes_along_path[..nodes_along_path.len() - 1] {
            self.push(source)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::damgard_jurik::generate_keypair;
    use rand::rngs::OsRng;
    use rand::seq::SliceRandom;

    fn chunks(values: &[u32]) -> Vec<BigUint> {
        values.iter().map(|&v| BigUint::from(v)).collect()
    }

    #[test]
    fn test_basic() {
        let total_levels = 5;
        let blocks_per_bucket = 25;
        let total_blocks = (1 << total_levels) * blocks_per_bucket;
        let chunks_per_block = 10;

        let wrapper = PlainServerWrapper::new(total_levels, blocks_per_bucket, chunks_per_block);
        let mut client = Client::new(wrapper, total_blocks, None, OsRng).unwrap();

        let data: Vec<BigUint> = (0..10u32).rev().map(BigUint::from).collect();
        client
            .access(1, Operation::Write, Some(data.clone()))
            .unwrap();
        assert_eq!(
            client.access(1, Operation::Read, None).unwrap(),
            Some(data.clone())
        );

        client
            .access(13, Operation::Write, Some(chunks(&[189, 224])))
            .unwrap();
        assert_eq!(
            client.access(13, Operation::Read, None).unwrap(),
            Some(chunks(&[189, 224]))
        );
        assert_eq!(client.access(1, Operation::Read, None).unwrap(), Some(data));
    }

    #[test]
    fn test_read_before_write_fails() {
        let wrapper = PlainServerWrapper::new(3, 4, 2);
        let mut client = Client::new(wrapper, 8, Some(4), OsRng).unwrap();
        assert_eq!(
            client.access(3, Operation::Read, None),
            Err(InternalError::UnwrittenBlock)
        );
    }

    #[test]
    fn test_stress_plain() {
        let mut rng = OsRng;
        let total_levels = 5;
        let blocks_per_bucket = 80;
        let total_blocks = (1 << total_levels) * (blocks_per_bucket / 5);
        let chunks_per_block = 10;

        let wrapper = PlainServerWrapper::new(total_levels, blocks_per_bucket, chunks_per_block);
        let mut client = Client::new(wrapper, total_blocks, Some(80), OsRng).unwrap();

        let mut datas: Vec<Vec<BigUint>> = (0..total_blocks)
            .map(|_| {
                let mut values: Vec<BigUint> = (0..30u32).map(BigUint::from).collect();
                values.shuffle(&mut rng);
                values
            })
            .collect();

        for (i, data) in datas.iter().enumerate() {
            client.access(i, Operation::Write, Some(data.clone())).unwrap();
            assert_eq!(
                client.access(i, Operation::Read, None).unwrap(),
                Some(data.clone())
            );
        }

        for _ in 0..1000 {
            let piece = rng.gen_range(0..total_blocks);
            assert_eq!(
                client.access(piece, Operation::Read, None).unwrap(),
                Some(datas[piece].clone())
            );
            datas[piece].shuffle(&mut rng);
            client
                .access(piece, Operation::Write, Some(datas[piece].clone()))
                .unwrap();
        }
    }

    #[test]
    fn test_basic_encrypted() {
        let mut rng = OsRng;
        let total_levels = 5;
        let blocks_per_bucket = 80;
        let total_blocks = (1 << total_levels) * (blocks_per_bucket / 5);
        let chunks_per_block = 10;
        let root_plain_space = 3;

        let (public, private) = generate_keypair(&mut rng, 128, root_plain_space).unwrap();
        let wrapper = EncServerWrapper::new(
            total_levels,
            blocks_per_bucket,
            chunks_per_block,
            root_plain_space,
            public,
            private,
            OsRng,
        );
        let mut client = Client::new(wrapper, total_blocks, None, OsRng).unwrap();

        let data: Vec<BigUint> = (0..10u32).rev().map(BigUint::from).collect();
        client
            .access(1, Operation::Write, Some(data.clone()))
            .unwrap();
        assert_eq!(
            client.access(1, Operation::Read, None).unwrap(),
            Some(data.clone())
        );

        let other = chunks(&[189, 224, 1, 2, 3, 4, 5, 6, 7, 8]);
        client
            .access(13, Operation::Write, Some(other.clone()))
            .unwrap();
        assert_eq!(
            client.access(13, Operation::Read, None).unwrap(),
            Some(other)
        );
        assert_eq!(client.access(1, Operation::Read, None).unwrap(), Some(data));
    }

    #[test]
    fn test_stress_encrypted() {
        let mut rng = OsRng;
        let total_levels = 3;
        let blocks_per_bucket = 20;
        let total_blocks = (1 << total_levels) * (blocks_per_bucket / 5);
        let chunks_per_block = 3;
        let root_plain_space = 1;

        let (public, private) = generate_keypair(&mut rng, 128, root_plain_space).unwrap();
        let wrapper = EncServerWrapper::new(
            total_levels,
            blocks_per_bucket,
            chunks_per_block,
            root_plain_space,
            public,
            private,
            OsRng,
        );
        let mut client = Client::new(wrapper, total_blocks, Some(20), OsRng).unwrap();

        let mut datas: Vec<Vec<BigUint>> = (0..total_blocks)
            .map(|_| {
                let mut values: Vec<BigUint> = (0..3u32).map(BigUint::from).collect();
                values.shuffle(&mut rng);
                values
            })
            .collect();

        for (i, data) in datas.iter().enumerate() {
            client.access(i, Operation::Write, Some(data.clone())).unwrap();
            assert_eq!(
                client.access(i, Operation::Read, None).unwrap(),
                Some(data.clone())
            );
        }

        for _ in 0..30 {
            let piece = rng.gen_range(0..total_blocks);
            assert_eq!(
                client.access(piece, Operation::Read, None).unwrap(),
                Some(datas[piece].clone())
            );
            datas[piece].shuffle(&mut rng);
            client
                .access(piece, Operation::Write, Some(datas[piece].clone()))
                .unwrap();
        }
    }
}
