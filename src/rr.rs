// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The double-buffered receive ring and its drain algorithm (§4.4).
//
// Grounded on proto::shm_ring's atomic control-word handoff, generalized
// from a fixed-`T`/fixed-`N` ring to the wire protocol's single combined
// index+length word and variable slot size. The per-slot commit spin
// reuses spin_lock::adaptive_yield's busy-spin/hint/yield/sleep ladder.

use crate::error::PfqError;
use crate::sqd::{self, PacketHeader, QueueDescriptor};

/// A snapshot of one drained half of the receive ring.
pub struct NetQueueView {
    base: *const u8,
    len: u32,
    slot_size: u32,
    index: u64,
}

// Safety: the view only reads through `base`, which remains valid for the
// lifetime of the endpoint's mapping; the endpoint enforces single-threaded
// access per the library's SPSC contract (§5).
unsafe impl Send for NetQueueView {}

impl NetQueueView {
    /// Number of packets captured in this half (capped at `slots`).
    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn slot_size(&self) -> u32 {
        self.slot_size
    }

    /// The half index observed at drain time (`index & 1` selects which
    /// physical half `base` points into).
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn base(&self) -> *const u8 {
        self.base
    }

    /// Total bytes spanned by the drained half's slots. This is the
    /// number of bytes an equivalent C `memcpy` would actually write,
    /// which per the spec's Open Questions is `slot_size * len`, distinct
    /// from the stricter `slots * slot_size` bound used to validate a
    /// caller-supplied `recv` buffer.
    pub fn copy_len(&self) -> usize {
        self.slot_size as usize * self.len as usize
    }

    fn slot_ptr(&self, i: u32) -> *const u8 {
        unsafe { self.base.add(i as usize * self.slot_size as usize) }
    }

    fn header_at(&self, i: u32) -> &PacketHeader {
        unsafe { &*(self.slot_ptr(i) as *const PacketHeader) }
    }

    /// A walking cursor over this half's committed slots (IT §4.4).
    pub fn cursor(&self) -> IterCursor<'_> {
        IterCursor { view: self, pos: 0 }
    }

    /// Header at an explicit slot index, for callers (e.g. `Endpoint::dispatch`)
    /// that persist the cursor position themselves across calls rather than
    /// holding a borrowed [`IterCursor`].
    pub fn header_at_pos(&self, i: u32) -> Option<&PacketHeader> {
        if i >= self.len {
            return None;
        }
        Some(self.header_at(i))
    }

    pub fn data_at_pos(&self, i: u32, offset: u32) -> Option<*const u8> {
        if i >= self.len {
            return None;
        }
        Some(unsafe { self.slot_ptr(i).add(offset as usize) })
    }

    /// Spin/yield until the slot at `i` is committed. No-op (returns
    /// `false`) past the end of the view.
    pub fn wait_committed_at(&self, i: u32) -> bool {
        let Some(hdr) = self.header_at_pos(i) else {
            return false;
        };
        let mut k = 0u32;
        while !hdr.is_committed() {
            crate::spin_lock::adaptive_yield_pub(&mut k);
        }
        true
    }
}

/// Packet-at-a-time cursor over a [`NetQueueView`]. Mirrors the spec's
/// `begin`/`end`/`next` walk by `slot_size` increments; `header`/`data`
/// dereference the slot at the cursor's current position.
pub struct IterCursor<'a> {
    view: &'a NetQueueView,
    pos: u32,
}

impl<'a> IterCursor<'a> {
    pub fn at_end(&self) -> bool {
        self.pos >= self.view.len
    }

    pub fn advance(&mut self) {
        self.pos += 1;
    }

    /// Spin/yield until the slot at the current position is committed,
    /// matching the commit flag's release/acquire contract (§5). Returns
    /// `false` if the cursor is already at end.
    pub fn wait_committed(&self) -> bool {
        if self.at_end() {
            return false;
        }
        let hdr = self.view.header_at(self.pos);
        let mut k = 0u32;
        while !hdr.is_committed() {
            crate::spin_lock::adaptive_yield_pub(&mut k);
        }
        true
    }

    pub fn header(&self) -> Option<&PacketHeader> {
        if self.at_end() {
            return None;
        }
        Some(self.view.header_at(self.pos))
    }

    /// Pointer to the packet payload: header address plus the endpoint's
    /// configured offset.
    pub fn data(&self, offset: u32) -> Option<*const u8> {
        if self.at_end() {
            return None;
        }
        Some(unsafe { self.view.slot_ptr(self.pos).add(offset as usize) })
    }
}

/// Step through the drain algorithm in §4.4.
///
/// `low_water_poll` is invoked when the producer has written fewer than
/// `slots / 2` packets since the last reset; its error, if any, is
/// returned immediately (step 2: "return on error"). Whether or not it
/// was called, step 3 always executes next.
pub fn drain(
    qd: &QueueDescriptor,
    queue_base: *const u8,
    slots: u32,
    slot_size: u32,
    mut low_water_poll: impl FnMut() -> Result<(), PfqError>,
) -> Result<NetQueueView, PfqError> {
    let (_, length) = qd.load();
    if length < slots / 2 {
        low_water_poll()?;
    }
    let (index, length) = qd.swap_half();
    let half = sqd::active_half(index);
    let half_bytes = slots as usize * slot_size as usize;
    let base = unsafe {
        queue_base
            .add(std::mem::size_of::<QueueDescriptor>())
            .add(half * half_bytes)
    };
    Ok(NetQueueView {
        base,
        len: length.min(slots),
        slot_size,
        index,
    })
}
