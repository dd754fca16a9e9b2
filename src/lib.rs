// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// User-space client library for a shared-memory packet capture/injection
// data plane. The kernel (or other out-of-process) side owns the receive
// ring's memory and a control channel answering the requests in
// `host::CcRequest`; this crate maps that ring, drains it, and offers a
// typed surface over the control channel's geometry, group, and
// transmit operations.
//
// The low-level IPC transport (shared memory handles, named mutexes,
// the request/response `Channel`) is binary-compatible with the C++
// libipc library this crate grew out of; see `shm`/`mutex`/`channel`.

pub mod shm_name;

mod platform;
#[cfg(windows)]
pub use platform::PlatformSemaphore as IpcSemaphore;

mod shm;
pub use shm::{ShmHandle, ShmOpenMode};

mod mutex;
pub use mutex::IpcMutex;

mod condition;
pub use condition::IpcCondition;

mod waiter;
pub use waiter::Waiter;

mod spin_lock;
pub use spin_lock::SpinLock;

mod buffer;
pub use buffer::IpcBuffer;

mod chunk_storage;

mod channel;
pub use channel::{Channel, Mode, Route};

mod proto;
pub use proto::ShmRing;

mod error;
pub use error::{CcOp, PfqError, Result};

mod sqd;
pub use sqd::{PacketHeader, QueueDescriptor};

mod stats;
pub use stats::Stats;

mod gm;
pub use gm::Policy;

mod host;
pub use host::{
    Binding, CcRequest, CcResponse, FakeHost, GroupJoinReq, GroupStateReq, HostChannel,
    ShmHostChannel, SteeringReq, ANY_GROUP, ANY_QUEUE,
};

mod rr;
pub use rr::{IterCursor, NetQueueView};

mod cpu_affinity;
pub use cpu_affinity::bind_current_thread;

mod tx;
pub use tx::TxMode;

mod ep;
pub use ep::{Endpoint, EndpointConfig};
