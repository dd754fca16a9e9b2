// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The control channel's transport is a capability interface (Design Note:
// "isolated behind a small capability interface so the core can be
// unit-tested against an in-memory fake host"). `ShmHostChannel` is the
// real transport, grounded on `channel::Channel`'s request/response
// framing over a named ring. `FakeHost` is an in-process test double that
// also owns the receive-ring shared memory segment, since in production
// that segment is populated by the kernel module, not by this crate.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use crate::channel::{Channel, Mode};
use crate::error::{CcOp, PfqError};
use crate::gm::Policy;
use crate::shm::{ShmHandle, ShmOpenMode};
use crate::sqd::{self, PacketHeader, QueueDescriptor};
use crate::stats::Stats;

pub const ANY_GROUP: i32 = -1;
pub const ANY_QUEUE: i32 = -1;

/// `binding := { gid, ifindex, queue }`. Fixed-shape, wire-compatible.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct Binding {
    pub gid: i32,
    pub ifindex: i32,
    pub queue: i32,
}

const _: () = assert!(std::mem::size_of::<Binding>() == 12);

/// `group_join := { gid, policy, class_mask }`. Fixed-shape, wire-compatible.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct GroupJoinReq {
    pub gid: i32,
    pub policy: Policy,
    pub class_mask: u64,
}

const _: () = assert!(std::mem::size_of::<GroupJoinReq>() == 16);

/// `steering := { name, gid }`.
///
/// Unlike `Binding`/`GroupJoinReq` this is NOT `#[repr(C)]`: the steering
/// function name is a bounded ASCII string validated and length-checked at
/// construction (see `Endpoint::set_group_steering_function`), but still
/// variable-length in memory, so there is no fixed `size_of` to assert.
/// The wire encoding below serializes `name` as raw bytes after the op
/// code and `gid`.
#[derive(Debug, Clone)]
pub struct SteeringReq {
    pub gid: i32,
    pub name: String,
}

/// Maximum length, in bytes, of a group steering function name (§4.3).
/// Mirrors the kernel module's fixed `char[]` buffer for this field.
pub const STEERING_NAME_MAX: usize = 64;

impl SteeringReq {
    /// Validate `name` against the bounded-ASCII contract before it is
    /// placed on the wire. Mirrors the kernel module rejecting anything
    /// that would not fit in its fixed-size steering-function buffer.
    pub(crate) fn validate_name(name: &str) -> Result<(), PfqError> {
        if name.is_empty() || name.len() > STEERING_NAME_MAX || !name.is_ascii() {
            return Err(PfqError::ControlFailure(CcOp::GroupSteerFun));
        }
        Ok(())
    }
}

/// `group_state := { ptr, size, gid }`, represented as an owned byte
/// sequence rather than a typed object (Design Note: "the library never
/// interprets the bytes"). Variable-length like `SteeringReq`, so it
/// likewise carries no `#[repr(C)]`/`size_of` assertion.
#[derive(Debug, Clone)]
pub struct GroupStateReq {
    pub gid: i32,
    pub state: Vec<u8>,
}

/// Every control-channel request, one variant per op code in §4.1.
#[derive(Debug, Clone)]
pub enum CcRequest {
    GetId,
    SetSlots(u32),
    SetCaplen(u32),
    SetOffset(u32),
    GetSlots,
    GetCaplen,
    GetOffset,
    ToggleQueue(bool),
    GetQueueMem,
    GetTstamp,
    SetTstamp(bool),
    AddBinding(Binding),
    RemoveBinding(Binding),
    GetGroups,
    GroupSteerFun(SteeringReq),
    GroupState(GroupStateReq),
    GroupJoin(GroupJoinReq),
    GroupLeave(i32),
    GetStatus,
    GetStats,
    GetGroupStats(i32),
    TxBind(Binding),
    TxStart(i32),
    TxStop,
    TxFlush,
    TxWakeup,
}

impl CcRequest {
    pub fn op(&self) -> CcOp {
        match self {
            CcRequest::GetId => CcOp::GetId,
            CcRequest::SetSlots(_) => CcOp::SetSlots,
            CcRequest::SetCaplen(_) => CcOp::SetCaplen,
            CcRequest::SetOffset(_) => CcOp::SetOffset,
            CcRequest::GetSlots => CcOp::GetSlots,
            CcRequest::GetCaplen => CcOp::GetCaplen,
            CcRequest::GetOffset => CcOp::GetOffset,
            CcRequest::ToggleQueue(_) => CcOp::ToggleQueue,
            CcRequest::GetQueueMem => CcOp::GetQueueMem,
            CcRequest::GetTstamp => CcOp::GetTstamp,
            CcRequest::SetTstamp(_) => CcOp::SetTstamp,
            CcRequest::AddBinding(_) => CcOp::AddBinding,
            CcRequest::RemoveBinding(_) => CcOp::RemoveBinding,
            CcRequest::GetGroups => CcOp::GetGroups,
            CcRequest::GroupSteerFun(_) => CcOp::GroupSteerFun,
            CcRequest::GroupState(_) => CcOp::GroupState,
            CcRequest::GroupJoin(_) => CcOp::GroupJoin,
            CcRequest::GroupLeave(_) => CcOp::GroupLeave,
            CcRequest::GetStatus => CcOp::GetStatus,
            CcRequest::GetStats => CcOp::GetStats,
            CcRequest::GetGroupStats(_) => CcOp::GetGroupStats,
            CcRequest::TxBind(_) => CcOp::TxBind,
            CcRequest::TxStart(_) => CcOp::TxStart,
            CcRequest::TxStop => CcOp::TxStop,
            CcRequest::TxFlush => CcOp::TxFlush,
            CcRequest::TxWakeup => CcOp::TxWakeup,
        }
    }
}

/// Every control-channel response.
#[derive(Debug, Clone)]
pub enum CcResponse {
    Id(i32),
    U32(u32),
    U64(u64),
    Bool(bool),
    Gid(i32),
    Stats(Stats),
    Ack,
}

/// Capability interface to the data-plane host. The real implementation
/// talks to a kernel module over a named control channel; tests talk to
/// [`FakeHost`] instead.
pub trait HostChannel: Send {
    fn call(&mut self, req: CcRequest) -> Result<CcResponse, PfqError>;

    /// Name of the shared-memory segment backing the receive ring, valid
    /// once [`CcRequest::ToggleQueue`] has been sent with `true`.
    fn queue_shm_name(&self) -> String;

    /// Push one synchronous TX frame (`TX.send`): copied into the next
    /// slot and transmitted immediately. Returns whether it was accepted.
    fn tx_send(&mut self, frame: &[u8]) -> Result<bool, PfqError>;

    /// Enqueue one frame for asynchronous transmission (`TX.send_async`).
    /// Not visible to the device until a flush (`TxFlush`) or, under
    /// `TxMode::Threaded`, the next worker wakeup.
    fn tx_enqueue(&mut self, frame: &[u8]) -> Result<bool, PfqError>;

    /// Resolve a device name to an ifindex (standard `ifindex`-by-name
    /// ioctl on the real transport; a capability boundary so the core can
    /// be tested without a real network device, per Design Note in §9).
    fn resolve_ifindex(&mut self, dev: &str) -> Result<i32, PfqError>;

    /// Block up to `timeout_us` microseconds for new data on the receive
    /// ring (step 2 of the drain algorithm, §4.4). The real transport
    /// waits on the queue's readiness descriptor; a negative timeout
    /// blocks indefinitely, zero polls once and returns immediately.
    fn poll(&mut self, timeout_us: i64) -> Result<(), PfqError>;
}

// ---------------------------------------------------------------------------
// ShmHostChannel — real transport
// ---------------------------------------------------------------------------

/// Real control-channel transport: a request channel and a response
/// channel, named from the endpoint's control-channel name. Grounded on
/// `channel::Channel::send`/`recv`, generalized from an arbitrary byte
/// message to a serialized [`CcRequest`]/[`CcResponse`] pair.
///
/// Requires a counterpart process implementing the same wire protocol on
/// the host side; none ships with this crate (the data-plane host is an
/// external collaborator, out of scope per the capture specification).
pub struct ShmHostChannel {
    name: String,
    req: Channel,
    resp: Channel,
}

impl ShmHostChannel {
    pub fn connect(name: &str) -> Result<Self, PfqError> {
        let req = Channel::connect(&format!("{name}_CC_REQ"), Mode::Sender)
            .map_err(|_| PfqError::ModuleNotLoaded)?;
        let resp = Channel::connect(&format!("{name}_CC_RESP"), Mode::Receiver)
            .map_err(|_| PfqError::ModuleNotLoaded)?;
        Ok(Self { name: name.to_owned(), req, resp })
    }
}

impl HostChannel for ShmHostChannel {
    fn call(&mut self, req: CcRequest) -> Result<CcResponse, PfqError> {
        let op = req.op();
        let bytes = wire::encode_request(&req);
        self.req
            .send(&bytes, 1000)
            .map_err(|_| PfqError::ControlFailure(op))?;
        let buf = self
            .resp
            .recv(Some(1000))
            .map_err(|_| PfqError::ControlFailure(op))?;
        wire::decode_response(buf.data()).ok_or(PfqError::ControlFailure(op))
    }

    fn queue_shm_name(&self) -> String {
        format!("{}_RR", self.name)
    }

    fn tx_send(&mut self, frame: &[u8]) -> Result<bool, PfqError> {
        self.req
            .send(frame, 1000)
            .map_err(|_| PfqError::ControlFailure(CcOp::TxBind))
    }

    fn tx_enqueue(&mut self, frame: &[u8]) -> Result<bool, PfqError> {
        self.req
            .try_send(frame)
            .map_err(|_| PfqError::ControlFailure(CcOp::TxBind))
    }

    // Standard ifindex-by-name resolution (§6). `if_nametoindex` is the
    // portable POSIX entry point for this; the historical ioctl
    // (`SIOCGIFINDEX`) it wraps is Linux-specific.
    #[cfg(unix)]
    fn resolve_ifindex(&mut self, dev: &str) -> Result<i32, PfqError> {
        use std::ffi::CString;
        let cname = CString::new(dev).map_err(|_| PfqError::DeviceNotFound)?;
        let idx = unsafe { libc::if_nametoindex(cname.as_ptr()) };
        if idx == 0 {
            Err(PfqError::DeviceNotFound)
        } else {
            Ok(idx as i32)
        }
    }

    #[cfg(not(unix))]
    fn resolve_ifindex(&mut self, _dev: &str) -> Result<i32, PfqError> {
        Err(PfqError::DeviceNotFound)
    }

    // No dedicated readiness descriptor is wired up yet (the data-plane
    // host owns that eventfd/handle); bound the wait instead of blocking
    // forever so a caller with a negative timeout still makes progress.
    fn poll(&mut self, timeout_us: i64) -> Result<(), PfqError> {
        let capped = if timeout_us < 0 { 50_000 } else { timeout_us.min(50_000) };
        std::thread::sleep(std::time::Duration::from_micros(capped as u64));
        Ok(())
    }
}

mod wire {
    //! Minimal fixed-layout encoding of [`super::CcRequest`]/[`super::CcResponse`]
    //! for transmission over a raw byte channel. Op code first, then a
    //! payload whose shape depends on the op — mirrors the `binding`/
    //! `group_join`/`steering`/`group_state`/`stats` payload layouts in
    //! the wire protocol.
    use super::*;

    pub fn encode_request(req: &CcRequest) -> Vec<u8> {
        let mut out = vec![0u8; 2];
        out[0..2].copy_from_slice(&(req.op() as u16).to_le_bytes());
        match req {
            CcRequest::SetSlots(v) | CcRequest::SetCaplen(v) | CcRequest::SetOffset(v) => {
                out.extend_from_slice(&v.to_le_bytes());
            }
            CcRequest::ToggleQueue(b) | CcRequest::SetTstamp(b) => out.push(*b as u8),
            CcRequest::AddBinding(b) | CcRequest::RemoveBinding(b) | CcRequest::TxBind(b) => {
                out.extend_from_slice(&b.gid.to_le_bytes());
                out.extend_from_slice(&b.ifindex.to_le_bytes());
                out.extend_from_slice(&b.queue.to_le_bytes());
            }
            CcRequest::GroupJoin(j) => {
                out.extend_from_slice(&j.gid.to_le_bytes());
                out.extend_from_slice(&(j.policy as i32).to_le_bytes());
                out.extend_from_slice(&j.class_mask.to_le_bytes());
            }
            CcRequest::GroupLeave(gid) | CcRequest::GetGroupStats(gid) | CcRequest::TxStart(gid) => {
                out.extend_from_slice(&gid.to_le_bytes());
            }
            CcRequest::GroupSteerFun(s) => {
                out.extend_from_slice(&s.gid.to_le_bytes());
                out.extend_from_slice(s.name.as_bytes());
            }
            CcRequest::GroupState(s) => {
                out.extend_from_slice(&s.gid.to_le_bytes());
                out.extend_from_slice(&s.state);
            }
            _ => {}
        }
        out
    }

    pub fn decode_response(bytes: &[u8]) -> Option<CcResponse> {
        if bytes.len() < 1 {
            return None;
        }
        match bytes[0] {
            0 => Some(CcResponse::Ack),
            1 => Some(CcResponse::Id(i32::from_le_bytes(bytes[1..5].try_into().ok()?))),
            2 => Some(CcResponse::U32(u32::from_le_bytes(bytes[1..5].try_into().ok()?))),
            3 => Some(CcResponse::U64(u64::from_le_bytes(bytes[1..9].try_into().ok()?))),
            4 => Some(CcResponse::Bool(bytes[1] != 0)),
            5 => Some(CcResponse::Gid(i32::from_le_bytes(bytes[1..5].try_into().ok()?))),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// FakeHost — in-memory test double
// ---------------------------------------------------------------------------

struct GroupEntry {
    policy: Policy,
    class_mask: u64,
    steering_function: Option<String>,
    state: Vec<u8>,
}

struct FakeHostState {
    id: i32,
    caplen: u32,
    offset: u32,
    slots: u32,
    tstamp: bool,
    enabled: bool,
    queue_shm: Option<ShmHandle>,
    groups_mask: u64,
    groups: HashMap<i32, GroupEntry>,
    next_gid: i32,
    bindings: Vec<Binding>,
    stats: Stats,
    group_stats: HashMap<i32, Stats>,
    tx_mode_threaded: bool,
    tx_pending: Vec<Vec<u8>>,
    tx_sent: Vec<Vec<u8>>,
}

static NEXT_ID: AtomicI32 = AtomicI32::new(1);

/// An in-process stand-in for the data-plane host, used for deterministic
/// unit and integration tests. It owns a real `ShmHandle`-backed receive
/// ring so that `enable`/`disable`/`read` exercise the actual mmap
/// lifecycle, not a mock of it.
///
/// Cloning shares the underlying state (`Arc`), so a test can keep a
/// handle to seed packets into the ring after the original has been
/// moved into an `Endpoint` as a `Box<dyn HostChannel>`.
pub struct FakeHost {
    name: String,
    state: Arc<Mutex<FakeHostState>>,
}

impl Clone for FakeHost {
    fn clone(&self) -> Self {
        Self { name: self.name.clone(), state: Arc::clone(&self.state) }
    }
}

impl FakeHost {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            state: Arc::new(Mutex::new(FakeHostState {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                caplen: 0,
                offset: 0,
                slots: 0,
                tstamp: false,
                enabled: false,
                queue_shm: None,
                groups_mask: 0,
                groups: HashMap::new(),
                next_gid: 0,
                bindings: Vec::new(),
                stats: Stats::default(),
                group_stats: HashMap::new(),
                tx_mode_threaded: false,
                tx_pending: Vec::new(),
                tx_sent: Vec::new(),
            })),
        }
    }

    fn queue_mem(caplen: u32, slots: u32) -> u64 {
        let slot = sqd::slot_size(caplen) as u64;
        std::mem::size_of::<QueueDescriptor>() as u64 + 2 * slots as u64 * slot
    }

    /// Test helper: write `packets` worth of fully-committed slots into
    /// the given half and publish them via the SQD swap word, simulating
    /// the external producer described by invariant 6 / scenario S4.
    pub fn seed_committed_half(&self, half: usize, packets: &[&[u8]]) -> io::Result<()> {
        let st = self.state.lock().unwrap();
        let shm = st.queue_shm.as_ref().expect("enable() before seeding");
        let slot = sqd::slot_size(st.caplen) as usize;
        let base = unsafe {
            shm.get()
                .add(std::mem::size_of::<QueueDescriptor>())
                .add(half * st.slots as usize * slot)
        };
        for (i, pkt) in packets.iter().enumerate() {
            if i as u32 >= st.slots {
                break;
            }
            unsafe {
                let hdr = base.add(i * slot) as *mut PacketHeader;
                (*hdr).len = pkt.len() as u32;
                (*hdr).caplen = pkt.len().min(st.caplen as usize) as u32;
                (*hdr).tstamp_sec = 0;
                (*hdr).tstamp_nsec = 0;
                (*hdr).ifindex = 0;
                (*hdr).queue_id = 0;
                let payload = (hdr as *mut u8).add(st.offset as usize);
                std::ptr::copy_nonoverlapping(pkt.as_ptr(), payload, (*hdr).caplen as usize);
                (*hdr).commit();
            }
        }
        let qd = unsafe { &*(shm.get() as *const QueueDescriptor) };
        let index = half as u64;
        qd.data.store(
            sqd::encode_swap(index) | (packets.len().min(st.slots as usize) as u64),
            Ordering::Release,
        );
        Ok(())
    }
}

impl HostChannel for FakeHost {
    fn call(&mut self, req: CcRequest) -> Result<CcResponse, PfqError> {
        let mut st = self.state.lock().unwrap();
        match req {
            CcRequest::GetId => Ok(CcResponse::Id(st.id)),
            CcRequest::SetSlots(v) => {
                st.slots = v;
                Ok(CcResponse::Ack)
            }
            CcRequest::SetCaplen(v) => {
                st.caplen = v;
                Ok(CcResponse::Ack)
            }
            CcRequest::SetOffset(v) => {
                st.offset = v;
                Ok(CcResponse::Ack)
            }
            CcRequest::GetSlots => Ok(CcResponse::U32(st.slots)),
            CcRequest::GetCaplen => Ok(CcResponse::U32(st.caplen)),
            CcRequest::GetOffset => Ok(CcResponse::U32(st.offset)),
            CcRequest::GetTstamp => Ok(CcResponse::Bool(st.tstamp)),
            CcRequest::SetTstamp(b) => {
                st.tstamp = b;
                Ok(CcResponse::Ack)
            }
            CcRequest::ToggleQueue(on) => {
                if on {
                    if st.enabled {
                        return Err(PfqError::ControlFailure(CcOp::ToggleQueue));
                    }
                    let size = Self::queue_mem(st.caplen, st.slots) as usize;
                    let shm = ShmHandle::acquire(
                        &format!("{}_RR", self.name),
                        size,
                        ShmOpenMode::CreateOrOpen,
                    )?;
                    unsafe { std::ptr::write_bytes(shm.get(), 0, size) };
                    st.queue_shm = Some(shm);
                    st.enabled = true;
                } else {
                    st.queue_shm = None;
                    st.enabled = false;
                }
                Ok(CcResponse::Ack)
            }
            CcRequest::GetQueueMem => Ok(CcResponse::U64(Self::queue_mem(st.caplen, st.slots))),
            CcRequest::AddBinding(b) => {
                st.bindings.push(b);
                Ok(CcResponse::Ack)
            }
            CcRequest::RemoveBinding(b) => {
                st.bindings.retain(|x| {
                    !(x.gid == b.gid && x.ifindex == b.ifindex && x.queue == b.queue)
                });
                Ok(CcResponse::Ack)
            }
            CcRequest::GetGroups => Ok(CcResponse::U64(st.groups_mask)),
            CcRequest::GroupSteerFun(s) => {
                st.groups
                    .get_mut(&s.gid)
                    .ok_or(PfqError::ControlFailure(CcOp::GroupSteerFun))?
                    .steering_function = Some(s.name);
                Ok(CcResponse::Ack)
            }
            CcRequest::GroupState(s) => {
                st.groups
                    .get_mut(&s.gid)
                    .ok_or(PfqError::ControlFailure(CcOp::GroupState))?
                    .state = s.state;
                Ok(CcResponse::Ack)
            }
            CcRequest::GroupJoin(j) => {
                if matches!(j.policy, Policy::Undefined) {
                    return Err(PfqError::UndefinedPolicyOnJoin);
                }
                let gid = if j.gid == ANY_GROUP {
                    let g = st.next_gid;
                    st.next_gid += 1;
                    g
                } else {
                    j.gid
                };
                st.groups.insert(
                    gid,
                    GroupEntry {
                        policy: j.policy,
                        class_mask: j.class_mask,
                        steering_function: None,
                        state: Vec::new(),
                    },
                );
                if gid < 64 {
                    st.groups_mask |= 1u64 << gid;
                }
                st.group_stats.entry(gid).or_default();
                Ok(CcResponse::Gid(gid))
            }
            CcRequest::GroupLeave(gid) => {
                st.groups.remove(&gid);
                if gid >= 0 && gid < 64 {
                    st.groups_mask &= !(1u64 << gid);
                }
                Ok(CcResponse::Ack)
            }
            CcRequest::GetStatus => Ok(CcResponse::Bool(st.enabled)),
            CcRequest::GetStats => Ok(CcResponse::Stats(st.stats)),
            CcRequest::GetGroupStats(gid) => Ok(CcResponse::Stats(
                st.group_stats.get(&gid).copied().unwrap_or_default(),
            )),
            CcRequest::TxBind(_) => Ok(CcResponse::Ack),
            CcRequest::TxStart(_) => {
                st.tx_mode_threaded = true;
                Ok(CcResponse::Ack)
            }
            CcRequest::TxStop => {
                st.tx_mode_threaded = false;
                Ok(CcResponse::Ack)
            }
            CcRequest::TxFlush => {
                let pending = std::mem::take(&mut st.tx_pending);
                st.stats.sent += pending.len() as u64;
                st.tx_sent.extend(pending);
                Ok(CcResponse::Ack)
            }
            CcRequest::TxWakeup => {
                if st.tx_mode_threaded {
                    let pending = std::mem::take(&mut st.tx_pending);
                    st.stats.sent += pending.len() as u64;
                    st.tx_sent.extend(pending);
                }
                Ok(CcResponse::Ack)
            }
        }
    }

    fn queue_shm_name(&self) -> String {
        format!("{}_RR", self.name)
    }

    fn tx_send(&mut self, frame: &[u8]) -> Result<bool, PfqError> {
        let mut st = self.state.lock().unwrap();
        st.stats.sent += 1;
        st.tx_sent.push(frame.to_vec());
        Ok(true)
    }

    fn tx_enqueue(&mut self, frame: &[u8]) -> Result<bool, PfqError> {
        let mut st = self.state.lock().unwrap();
        st.tx_pending.push(frame.to_vec());
        Ok(true)
    }

    fn resolve_ifindex(&mut self, dev: &str) -> Result<i32, PfqError> {
        if dev.is_empty() {
            return Err(PfqError::DeviceNotFound);
        }
        Ok(((crate::shm_name::fnv1a_64(dev.as_bytes()) & 0x7fff_fffe) as i32) + 1)
    }

    // Tests drive the ring by fully committing a half before calling
    // `read`, so there is never anything to actually wait for here.
    fn poll(&mut self, _timeout_us: i64) -> Result<(), PfqError> {
        Ok(())
    }
}

impl Drop for FakeHost {
    fn drop(&mut self) {
        if Arc::strong_count(&self.state) == 1 {
            ShmHandle::clear_storage(&format!("{}_RR", self.name));
        }
    }
}
