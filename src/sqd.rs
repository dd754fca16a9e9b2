// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Shared queue descriptor and per-slot packet header.
//
// Layout is fixed by the wire contract: offset 0 of the mapped region is
// `QueueDescriptor { data: atomic u64, .. }`; everything after it is the
// two halves of the receive ring, each `slots * slot_size` bytes.
//
// Grounded on proto::shm_ring::Header (cache-line-padded atomic control
// word with a compile-time size assertion), generalized from a split
// write_idx/read_idx pair to the single combined index+length word this
// protocol actually uses on the wire.

use std::sync::atomic::{AtomicU64, AtomicU32, Ordering};

/// Low 24 bits of `data` carry the packet count written since the last
/// reset; everything above that is the half-selecting generation index.
pub const SQD_LENGTH_BITS: u32 = 24;
pub const SQD_LENGTH_MASK: u64 = (1u64 << SQD_LENGTH_BITS) - 1;

/// Decode `(index, length)` from a raw SQD `data` word.
#[inline]
pub fn decode(data: u64) -> (u64, u32) {
    let length = (data & SQD_LENGTH_MASK) as u32;
    let index = data >> SQD_LENGTH_BITS;
    (index, length)
}

/// Encode the word written by the half-swap: length cleared, index bumped.
#[inline]
pub fn encode_swap(next_index: u64) -> u64 {
    next_index << SQD_LENGTH_BITS
}

/// Encode an arbitrary `(index, length)` pair into a raw `data` word.
#[inline]
pub fn encode(index: u64, length: u32) -> u64 {
    (index << SQD_LENGTH_BITS) | (length as u64 & SQD_LENGTH_MASK)
}

/// Which of the two halves `index` currently selects.
#[inline]
pub fn active_half(index: u64) -> usize {
    (index & 1) as usize
}

/// Cache-line-padded shared queue descriptor at offset 0 of the mapping.
#[repr(C)]
pub struct QueueDescriptor {
    pub data: AtomicU64,
    _pad: [u8; 64 - 8],
}

const _: () = assert!(std::mem::size_of::<QueueDescriptor>() == 64);

impl QueueDescriptor {
    pub fn reset(&self) {
        self.data.store(0, Ordering::Relaxed);
    }

    /// Load `(index, length)` with acquire ordering, matching the
    /// producer's release on the same word (§5: "a release/acquire
    /// contract on `commit`" applies equally to this swap word).
    pub fn load(&self) -> (u64, u32) {
        decode(self.data.load(Ordering::Acquire))
    }

    /// Step 3 of the drain algorithm: atomically publish a fresh half and
    /// capture the final `(index, length)` of the half being handed to
    /// the consumer. This is the single synchronization point between
    /// producer and consumer.
    pub fn swap_half(&self) -> (u64, u32) {
        let (index, _) = decode(self.data.load(Ordering::Relaxed));
        let prev = self.data.swap(encode_swap(index + 1), Ordering::AcqRel);
        decode(prev)
    }
}

/// `align8(sizeof(PacketHeader) + caplen)`.
#[inline]
pub fn slot_size(caplen: u32) -> u32 {
    align8(std::mem::size_of::<PacketHeader>() as u32 + caplen)
}

#[inline]
pub fn align8(n: u32) -> u32 {
    (n + 7) & !7
}

/// Per-slot header (`pfq_hdr`). `commit` is set last by the producer to
/// publish the slot; the consumer must observe it before reading `len`,
/// `caplen`, or the payload that follows this header at `offset` bytes.
#[repr(C)]
pub struct PacketHeader {
    pub len: u32,
    pub caplen: u32,
    pub tstamp_sec: i64,
    pub tstamp_nsec: i64,
    pub ifindex: i32,
    pub queue_id: i32,
    commit: AtomicU32,
}

impl PacketHeader {
    pub fn is_committed(&self) -> bool {
        self.commit.load(Ordering::Acquire) != 0
    }

    /// Zero the header and clear `commit`. Used by the producer side of
    /// the fake host when seeding test fixtures.
    pub fn clear(&mut self) {
        self.len = 0;
        self.caplen = 0;
        self.tstamp_sec = 0;
        self.tstamp_nsec = 0;
        self.ifindex = 0;
        self.queue_id = 0;
        self.commit.store(0, Ordering::Release);
    }

    /// Publish the slot: caller has already written `len`/`caplen`/
    /// timestamps/payload; this sets `commit` last with release ordering.
    pub fn commit(&self) {
        self.commit.store(1, Ordering::Release);
    }
}
