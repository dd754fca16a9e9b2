// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Higher-level protocol layer built on top of the core IPC transport.

pub mod shm_ring;

pub use shm_ring::ShmRing;
