// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Stable error tags for the control/data plane contract. Every public
// endpoint operation returns `Result<_, PfqError>`; the `Display` impl
// renders the short, stable string form documented on the wire protocol
// (prefixed "PFQ: ...").

use std::fmt;
use std::io;

/// Control channel operation code, carried by [`PfqError::ControlFailure`]
/// to identify which request the host rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CcOp {
    GetId = 0,
    SetSlots = 1,
    SetCaplen = 2,
    SetOffset = 3,
    ToggleQueue = 4,
    GetQueueMem = 5,
    GetTstamp = 6,
    SetTstamp = 7,
    GetCaplen = 8,
    GetOffset = 9,
    GetSlots = 10,
    AddBinding = 11,
    RemoveBinding = 12,
    GetGroups = 13,
    GroupSteerFun = 14,
    GroupState = 15,
    GroupJoin = 16,
    GroupLeave = 17,
    GetStatus = 18,
    GetStats = 19,
    GetGroupStats = 20,
    TxBind = 21,
    TxStart = 22,
    TxStop = 23,
    TxFlush = 24,
    TxWakeup = 25,
}

impl CcOp {
    /// Short mnemonic used in the stable error string, e.g. `"GET_STATS"`.
    pub fn name(self) -> &'static str {
        match self {
            CcOp::GetId => "GET_ID",
            CcOp::SetSlots => "SET_SLOTS",
            CcOp::SetCaplen => "SET_CAPLEN",
            CcOp::SetOffset => "SET_OFFSET",
            CcOp::ToggleQueue => "TOGGLE_QUEUE",
            CcOp::GetQueueMem => "GET_QUEUE_MEM",
            CcOp::GetTstamp => "GET_TSTAMP",
            CcOp::SetTstamp => "SET_TSTAMP",
            CcOp::GetCaplen => "GET_CAPLEN",
            CcOp::GetOffset => "GET_OFFSET",
            CcOp::GetSlots => "GET_SLOTS",
            CcOp::AddBinding => "ADD_BINDING",
            CcOp::RemoveBinding => "REMOVE_BINDING",
            CcOp::GetGroups => "GET_GROUPS",
            CcOp::GroupSteerFun => "GROUP_STEER_FUN",
            CcOp::GroupState => "GROUP_STATE",
            CcOp::GroupJoin => "GROUP_JOIN",
            CcOp::GroupLeave => "GROUP_LEAVE",
            CcOp::GetStatus => "GET_STATUS",
            CcOp::GetStats => "GET_STATS",
            CcOp::GetGroupStats => "GET_GROUP_STATS",
            CcOp::TxBind => "TX_BIND",
            CcOp::TxStart => "TX_START",
            CcOp::TxStop => "TX_STOP",
            CcOp::TxFlush => "TX_FLUSH",
            CcOp::TxWakeup => "TX_WAKEUP",
        }
    }
}

impl fmt::Display for CcOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Stable, named error kinds for every public failure mode of the library.
///
/// `Display` renders the short "PFQ: ..." form used historically as the
/// per-endpoint last-error string; callers that need the compatibility
/// accessor should use [`crate::Endpoint::last_error`] rather than parsing
/// this string.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PfqError {
    #[error("PFQ: module not loaded")]
    ModuleNotLoaded,

    #[error("PFQ: out of memory")]
    OutOfMemory,

    #[error("PFQ: socket not open")]
    NotOpen,

    #[error("PFQ: geometry change while enabled")]
    EnabledGeometryChange,

    #[error("PFQ: {0} error")]
    ControlFailure(CcOp),

    #[error("PFQ: mmap failure")]
    MmapFailure,

    #[error("PFQ: munmap failure")]
    MunmapFailure,

    #[error("PFQ: device not found")]
    DeviceNotFound,

    #[error("PFQ: buffer too small")]
    BufferTooSmall,

    #[error("PFQ: default group undefined")]
    DefaultGroupUndefined,

    #[error("PFQ: undefined policy on join")]
    UndefinedPolicyOnJoin,

    #[error("PFQ: poll failure")]
    PollFailure,
}

impl From<io::Error> for PfqError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::OutOfMemory => PfqError::OutOfMemory,
            io::ErrorKind::NotFound => PfqError::DeviceNotFound,
            _ => PfqError::MmapFailure,
        }
    }
}

pub type Result<T> = std::result::Result<T, PfqError>;
