// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Endpoint-wide and per-group counters (§4.6, wire layout in §6).

/// `stats := { recv, lost, drop, sent, disc: u64 }`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub recv: u64,
    pub lost: u64,
    pub drop: u64,
    pub sent: u64,
    pub disc: u64,
}

const _: () = assert!(std::mem::size_of::<Stats>() == 40);
