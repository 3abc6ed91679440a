// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! A plaintext tree ORAM.
//!
//! Blocks live in buckets arranged as a complete binary tree, heap-indexed
//! from the root. Every block is tagged with the leaf it must stay on the
//! path of; accesses read a whole path, remap the block to a fresh random
//! leaf, and rewrite it at the root. A background eviction pass pushes blocks
//! down one level at a time along bit-reversed paths so the root does not
//! overflow. No encryption is involved; the [`onion`](crate::onion) module
//! builds the oblivious variant on the same tree shape.

use crate::errors::{InternalError, Result};
use crate::utils::{bitreverse, is_parent};
use rand::distributions::Alphanumeric;
use rand::seq::SliceRandom;
use rand::{CryptoRng, Rng, RngCore};

/// Fixed length of a block's string contents.
pub const BLOCK_CONTENTS_LEN: usize = 8;

/// Filler contents for blocks placed during bootstrap.
const BOOTSTRAP_FILL: &str = "00000000";

/// Whether an access reads or overwrites the block.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Operation {
    /// Return the block's contents.
    Read,
    /// Replace the block's contents.
    Write,
}

/// One slot in a bucket. Dummy slots have no address and hold junk contents
/// indistinguishable from real ones.
#[derive(Clone, Debug)]
pub struct Block {
    address: Option<usize>,
    leaf_target: usize,
    contents: String,
}

impl Block {
    fn dummy<R: RngCore>(rng: &mut R) -> Self {
        let contents = rng
            .sample_iter(&Alphanumeric)
            .take(BLOCK_CONTENTS_LEN)
            .map(char::from)
            .collect();
        Block {
            address: None,
            leaf_target: 0,
            contents,
        }
    }

    fn is_valid(&self) -> bool {
        self.address.is_some()
    }

    fn invalidate(&mut self) {
        self.address = None;
        self.leaf_target = 0;
    }
}

#[derive(Clone, Debug)]
struct Bucket {
    blocks: Vec<Block>,
}

impl Bucket {
    fn new<R: RngCore>(blocks_per_bucket: usize, rng: &mut R) -> Self {
        let blocks = (0..blocks_per_bucket).map(|_| Block::dummy(rng)).collect();
        Bucket { blocks }
    }

    /// Splits the bucket's slot indices into (free, occupied).
    fn slot_partition(&self) -> (Vec<usize>, Vec<usize>) {
        let mut free_slots = vec![];
        let mut valid_slots = vec![];
        for (i, block) in self.blocks.iter().enumerate() {
            if block.is_valid() {
                valid_slots.push(i);
            } else {
                free_slots.push(i);
            }
        }
        (free_slots, valid_slots)
    }

    fn invalidate_all(&mut self) {
        for block in &mut self.blocks {
            block.invalidate();
        }
    }
}

/// The untrusted storage side: a complete binary tree of buckets.
#[derive(Clone, Debug)]
pub struct Server {
    total_levels: u32,
    blocks_per_bucket: usize,
    buckets: Vec<Bucket>,
}

impl Server {
    /// Builds a tree with `total_levels + 1` levels of buckets, every slot
    /// initialized to a junk dummy.
    pub fn new<R: RngCore>(total_levels: u32, blocks_per_bucket: usize, rng: &mut R) -> Self {
        let total_buckets = (1usize << (total_levels + 1)) - 1;
        let buckets = (0..total_buckets)
            .map(|_| Bucket::new(blocks_per_bucket, rng))
            .collect();
        Server {
            total_levels,
            blocks_per_bucket,
            buckets,
        }
    }

    /// Number of levels below the root.
    pub fn total_levels(&self) -> u32 {
        self.total_levels
    }

    /// Capacity of each bucket.
    pub fn blocks_per_bucket(&self) -> usize {
        self.blocks_per_bucket
    }

    /// Reads and invalidates the block with `address` somewhere on the path
    /// from `leaf_target` up to the root. The block must occur exactly once.
    pub fn read_path(&mut self, leaf_target: usize, address: usize) -> Result<String> {
        let mut at = leaf_target + (1 << self.total_levels) - 1;

        let mut found: Option<(usize, usize)> = None;
        let mut occurrences = 0;
        for _ in 0..=self.total_levels {
            for slot in 0..self.blocks_per_bucket {
                if self.buckets[at].blocks[slot].address == Some(address) {
                    found = Some((at, slot));
                    occurrences += 1;
                }
            }
            at = at.saturating_sub(1) / 2;
        }

        match (found, occurrences) {
            (Some((bucket_id, slot)), 1) => {
                let block = &mut self.buckets[bucket_id].blocks[slot];
                block.invalidate();
                Ok(block.contents.clone())
            }
            (_, 0) => Err(InternalError::BlockNotFound),
            _ => Err(InternalError::DuplicateBlock),
        }
    }

    fn get_bucket(&self, bucket_id: usize) -> Bucket {
        self.buckets[bucket_id].clone()
    }

    fn set_bucket(&mut self, bucket_id: usize, bucket: Bucket) {
        self.buckets[bucket_id] = bucket;
    }

    fn get_block(&self, bucket_id: usize, slot: usize) -> &Block {
        &self.buckets[bucket_id].blocks[slot]
    }

    fn set_block(&mut self, bucket_id: usize, slot: usize, block: Block) {
        self.buckets[bucket_id].blocks[slot] = block;
    }

    /// Walks the whole tree and checks that every address is stored exactly
    /// once. Diagnostic aid for tests; not part of any access path.
    pub fn check_integrity(&self) -> Result<()> {
        let total_addresses = 1usize << self.total_levels;
        let mut seen = vec![false; total_addresses];
        let mut missing = total_addresses;

        let mut stack = vec![0usize];
        while let Some(at) = stack.pop() {
            if at * 2 + 1 < self.buckets.len() {
                stack.push(at * 2 + 1);
            }
            if at * 2 + 2 < self.buckets.len() {
                stack.push(at * 2 + 2);
            }
            for block in &self.buckets[at].blocks {
                if let Some(address) = block.address {
                    if seen[address] {
                        return Err(InternalError::IntegrityViolation(format!(
                            "address {} is present more than once",
                            address
                        )));
                    }
                    seen[address] = true;
                    missing -= 1;
                }
            }
        }

        if missing != 0 {
            return Err(InternalError::IntegrityViolation(format!(
                "{} addresses missing from the tree",
                missing
            )));
        }
        Ok(())
    }
}

/// The trusted side: owns the position map, the eviction schedule, and the
/// random generator used for remapping.
#[derive(Debug)]
pub struct Client<R: RngCore + CryptoRng> {
    total_levels: u32,
    total_blocks: usize,
    blocks_per_bucket: usize,
    eviction_period: usize,
    server: Server,
    eviction_counter: usize,
    next_evicted_path: usize,
    position_map: Vec<Option<usize>>,
    rng: R,
}

impl<R: RngCore + CryptoRng> Client<R> {
    /// Takes ownership of a freshly built server and bootstraps one block
    /// per address into a random slot.
    pub fn new(mut server: Server, eviction_period: usize, mut rng: R) -> Result<Self> {
        if eviction_period == 0 || eviction_period > server.blocks_per_bucket() {
            return Err(InternalError::InvalidArgument(String::from(
                "eviction period must be between 1 and the bucket capacity",
            )));
        }

        let total_levels = server.total_levels();
        let total_blocks = 1usize << total_levels;
        let mut position_map = vec![None; total_blocks];

        // Scatter every address into a random non-root slot whose bucket
        // lies on the path to some leaf, and tag it with that leaf.
        let mut address = 0;
        while address < total_blocks {
            let bucket_id = rng.gen_range(1..total_blocks * 2 - 1);
            let slot = rng.gen_range(0..server.blocks_per_bucket());
            if server.get_block(bucket_id, slot).is_valid() {
                continue;
            }
            let mut target = bucket_id;
            while target * 2 + 2 < total_blocks * 2 - 1 {
                target = target * 2 + rng.gen_range(1..=2);
            }
            target -= total_blocks - 1;
            server.set_block(
                bucket_id,
                slot,
                Block {
                    address: Some(address),
                    leaf_target: target,
                    contents: String::from(BOOTSTRAP_FILL),
                },
            );
            position_map[address] = Some(target);
            address += 1;
        }

        Ok(Client {
            total_levels,
            total_blocks,
            blocks_per_bucket: server.blocks_per_bucket(),
            eviction_period,
            server,
            eviction_counter: 0,
            next_evicted_path: 0,
            position_map,
            rng,
        })
    }

    /// A view of the storage side, for integrity checks.
    pub fn server(&self) -> &Server {
        &self.server
    }

    /// Reads or writes one block, remapping it to a fresh random leaf and
    /// rewriting it at the root. Returns the previous contents on a read.
    pub fn access(
        &mut self,
        address: usize,
        operation: Operation,
        new_data: Option<String>,
    ) -> Result<Option<String>> {
        if address >= self.total_blocks {
            return Err(InternalError::InvalidArgument(String::from(
                "address is out of range",
            )));
        }
        let leaf_target = self.position_map[address].ok_or(InternalError::UnwrittenBlock)?;

        let new_leaf_target = self.rng.gen_range(0..self.total_blocks);
        self.position_map[address] = Some(new_leaf_target);

        let mut data = self.server.read_path(leaf_target, address)?;
        if operation == Operation::Write {
            data = new_data.ok_or_else(|| {
                InternalError::InvalidArgument(String::from("write requires new contents"))
            })?;
        }

        // The freshly remapped block always re-enters at the root.
        self.server.set_block(
            0,
            self.eviction_counter,
            Block {
                address: Some(address),
                leaf_target: new_leaf_target,
                contents: data.clone(),
            },
        );

        self.eviction_counter += 1;
        if self.eviction_counter == self.eviction_period {
            self.eviction_counter = 0;
            let path = bitreverse(self.next_evicted_path, self.total_levels);
            self.evict_along_path(path)?;
            self.next_evicted_path += 1;
            if self.next_evicted_path >= self.total_blocks {
                self.next_evicted_path -= self.total_blocks;
            }
        }

        match operation {
            Operation::Read => Ok(Some(data)),
            Operation::Write => Ok(None),
        }
    }

    /// Pushes every block in `source` into whichever child keeps it on the
    /// path to its leaf target, choosing free child slots at random.
    fn push(&mut self, source: usize) -> Result<()> {
        let left_child = source * 2 + 1;
        let right_child = source * 2 + 2;

        let source_bucket = self.server.get_bucket(source);
        let mut left_bucket = self.server.get_bucket(left_child);
        let mut right_bucket = self.server.get_bucket(right_child);

        let (_, source_slots) = source_bucket.slot_partition();
        let (slots_left, _) = left_bucket.slot_partition();
        let (slots_right, _) = right_bucket.slot_partition();

        let mut towards_left = vec![];
        let mut towards_right = vec![];
        for slot in source_slots {
            let block = &source_bucket.blocks[slot];
            let target = block.leaf_target + (1 << self.total_levels) - 1;
            if is_parent(left_child, target) {
                towards_left.push(block.clone());
            } else {
                towards_right.push(block.clone());
            }
        }

        if slots_left.len() < towards_left.len() || slots_right.len() < towards_right.len() {
            return Err(InternalError::EvictionOverflow);
        }

        for (free_slots, moving, bucket) in [
            (slots_left, towards_left, &mut left_bucket),
            (slots_right, towards_right, &mut right_bucket),
        ] {
            let chosen: Vec<usize> = free_slots
                .choose_multiple(&mut self.rng, moving.len())
                .copied()
                .collect();
            for (slot, block) in chosen.into_iter().zip(moving) {
                bucket.blocks[slot] = block;
            }
        }

        let mut emptied = source_bucket;
        emptied.invalidate_all();
        self.server.set_bucket(source, emptied);
        self.server.set_bucket(left_child, left_bucket);
        self.server.set_bucket(right_child, right_bucket);
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

        // The leaf itself has no children to push into.
        for &source in &nodes_along_path[..nodes_along_path.len() - 1] {
            self.push(source)?;
        }
        Ok(())
    }
}
