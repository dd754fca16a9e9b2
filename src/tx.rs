// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Transmit path mode selection (§4.5). The operations themselves
// (`bind_tx`, `send`, `send_async`, `wakeup_tx_thread`, `stop_tx_thread`)
// are implemented on `Endpoint`, since each is a thin, typed wrapper
// around a `HostChannel` call — there is no local state worth splitting
// out beyond this mode flag and the worker-wake protocol, which reuses
// `cpu_affinity::bind_current_thread` for `start_tx_thread(node)`.

/// Publication mode for `send_async`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    /// Frames sit in the host's TX ring until an explicit
    /// `tx_queue_flush()` publishes them to the device.
    Deferred,
    /// Frames are published continuously by the in-kernel TX worker once
    /// `start_tx_thread(node)` has been called.
    Threaded,
}
