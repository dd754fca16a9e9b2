// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// `Endpoint`, the single object a caller opens, configures, and reads
// from. Ties the capability interface (`host::HostChannel`), the
// geometry/group control plane (CC/GM), and the receive ring (RR/IT)
// together.
//
// Grounded on channel::ChanInner's acquire-then-verify-then-rollback
// open sequence: on any failure partway through `open_group`, the
// partially built `Endpoint` (and the `HostChannel` it owns) is simply
// dropped, which is enough to release every resource acquired so far —
// no manual unwind bookkeeping needed.

use crate::error::{CcOp, PfqError, Result};
use crate::gm::Policy;
use crate::host::{
    Binding, CcRequest, CcResponse, GroupJoinReq, GroupStateReq, HostChannel, SteeringReq,
    ANY_GROUP,
};
use crate::rr::{self, NetQueueView};
use crate::shm::ShmHandle;
use crate::sqd::{self, PacketHeader, QueueDescriptor};
use crate::stats::Stats;
use crate::tx::TxMode;

/// Ring geometry requested at open time.
#[derive(Debug, Clone, Copy)]
pub struct EndpointConfig {
    pub caplen: u32,
    pub offset: u32,
    pub slots: u32,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self { caplen: 1514, offset: 0, slots: 4096 }
    }
}

/// A capture/injection endpoint bound to one data-plane host connection.
///
/// Not `Sync`: the receive ring is a single-consumer structure (§5), and
/// sharing one `Endpoint` across threads without external synchronization
/// would violate that contract. `NetQueueView`'s raw pointer already
/// blocks the auto-derived `Sync`, so no explicit opt-out is needed here.
pub struct Endpoint {
    host: Box<dyn HostChannel>,
    id: i32,
    gid: i32,
    caplen: u32,
    offset: u32,
    slots: u32,
    slot_size: u32,
    enabled: bool,
    closed: bool,
    shm: Option<ShmHandle>,
    view: Option<NetQueueView>,
    cursor: u32,
    last_error: Option<PfqError>,
}

impl Endpoint {
    /// Open without joining any group.
    pub fn open_nogroup(host: Box<dyn HostChannel>, config: EndpointConfig) -> Result<Self> {
        Self::open_internal(host, 0, Policy::Undefined, config)
    }

    /// Open and join a group (a fresh one, if `class_mask` should apply to
    /// an endpoint-local group rather than an existing shared one — use
    /// [`Endpoint::join_group`] with an explicit `gid` for the latter).
    pub fn open_group(
        host: Box<dyn HostChannel>,
        class_mask: u64,
        policy: Policy,
        config: EndpointConfig,
    ) -> Result<Self> {
        Self::open_internal(host, class_mask, policy, config)
    }

    /// Open and join a freshly allocated, all-classes, shared-policy
    /// group — the common case for a standalone capture endpoint.
    pub fn open(host: Box<dyn HostChannel>, config: EndpointConfig) -> Result<Self> {
        Self::open_group(host, u64::MAX, Policy::Shared, config)
    }

    fn open_internal(
        mut host: Box<dyn HostChannel>,
        class_mask: u64,
        policy: Policy,
        config: EndpointConfig,
    ) -> Result<Self> {
        let id = match host.call(CcRequest::GetId)? {
            CcResponse::Id(id) => id,
            _ => return Err(PfqError::ControlFailure(CcOp::GetId)),
        };
        host.call(CcRequest::SetSlots(config.slots))?;
        host.call(CcRequest::SetCaplen(config.caplen))?;
        host.call(CcRequest::SetOffset(config.offset))?;
        let slot_size = sqd::slot_size(config.caplen);

        let mut ep = Endpoint {
            host,
            id,
            gid: -1,
            caplen: config.caplen,
            offset: config.offset,
            slots: config.slots,
            slot_size,
            enabled: false,
            closed: false,
            shm: None,
            view: None,
            cursor: 0,
            last_error: None,
        };

        if !matches!(policy, Policy::Undefined) {
            // On failure `ep` is dropped here, taking its `host` (and thus
            // the control-channel connection) down with it.
            ep.join_group(ANY_GROUP, class_mask, policy)?;
        }

        log::debug!("pfq: endpoint {} opened (caplen={}, slots={})", id, config.caplen, config.slots);
        Ok(ep)
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            Err(PfqError::NotOpen)
        } else {
            Ok(())
        }
    }

    fn fail<T>(&mut self, e: PfqError) -> Result<T> {
        log::warn!("pfq: endpoint {} operation failed: {}", self.id, e);
        self.last_error = Some(e.clone());
        Err(e)
    }

    fn cc_ack(&mut self, req: CcRequest) -> Result<()> {
        let op = req.op();
        match self.host.call(req) {
            Ok(CcResponse::Ack) => {
                self.last_error = None;
                Ok(())
            }
            Ok(_) => self.fail(PfqError::ControlFailure(op)),
            Err(e) => self.fail(e),
        }
    }

    /// The last error recorded by a failing operation on this endpoint,
    /// kept for callers migrating from the historical `pfq_error()`
    /// string-accessor API (§7 compatibility note).
    pub fn last_error(&self) -> Option<&PfqError> {
        self.last_error.as_ref()
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    /// Whether the queue is enabled. Round-trips through the control
    /// channel on every call rather than trusting the local cache, since
    /// the host is the source of truth for this bit.
    pub fn is_enabled(&mut self) -> Result<bool> {
        self.check_open()?;
        match self.host.call(CcRequest::GetStatus) {
            Ok(CcResponse::Bool(b)) => {
                self.last_error = None;
                Ok(b)
            }
            Ok(_) => self.fail(PfqError::ControlFailure(CcOp::GetStatus)),
            Err(e) => self.fail(e),
        }
    }

    /// Current capture length. Round-trips through the control channel
    /// rather than the local cache, which may be stale if something else
    /// reconfigured the host out from under this endpoint.
    pub fn caplen(&mut self) -> Result<u32> {
        self.check_open()?;
        match self.host.call(CcRequest::GetCaplen) {
            Ok(CcResponse::U32(v)) => {
                self.last_error = None;
                Ok(v)
            }
            Ok(_) => self.fail(PfqError::ControlFailure(CcOp::GetCaplen)),
            Err(e) => self.fail(e),
        }
    }

    /// Current capture offset. Round-trips through the control channel;
    /// see [`Endpoint::caplen`].
    pub fn offset(&mut self) -> Result<u32> {
        self.check_open()?;
        match self.host.call(CcRequest::GetOffset) {
            Ok(CcResponse::U32(v)) => {
                self.last_error = None;
                Ok(v)
            }
            Ok(_) => self.fail(PfqError::ControlFailure(CcOp::GetOffset)),
            Err(e) => self.fail(e),
        }
    }

    /// Current ring depth. Unlike `caplen`/`offset`/`is_enabled`, this is
    /// a pure local read: it never changes except through `set_slots`,
    /// which updates the cache itself.
    pub fn slots(&self) -> u32 {
        self.slots
    }

    pub fn slot_size(&self) -> u32 {
        self.slot_size
    }

    // -- CC: geometry -------------------------------------------------

    pub fn set_caplen(&mut self, caplen: u32) -> Result<()> {
        self.check_open()?;
        if self.enabled {
            return self.fail(PfqError::EnabledGeometryChange);
        }
        self.cc_ack(CcRequest::SetCaplen(caplen))?;
        self.caplen = caplen;
        self.slot_size = sqd::slot_size(self.caplen);
        Ok(())
    }

    pub fn set_offset(&mut self, offset: u32) -> Result<()> {
        self.check_open()?;
        if self.enabled {
            return self.fail(PfqError::EnabledGeometryChange);
        }
        self.cc_ack(CcRequest::SetOffset(offset))?;
        self.offset = offset;
        Ok(())
    }

    pub fn set_slots(&mut self, slots: u32) -> Result<()> {
        self.check_open()?;
        if self.enabled {
            return self.fail(PfqError::EnabledGeometryChange);
        }
        self.cc_ack(CcRequest::SetSlots(slots))?;
        self.slots = slots;
        Ok(())
    }

    pub fn set_timestamping(&mut self, on: bool) -> Result<()> {
        self.check_open()?;
        self.cc_ack(CcRequest::SetTstamp(on))
    }

    pub fn timestamping(&mut self) -> Result<bool> {
        self.check_open()?;
        match self.host.call(CcRequest::GetTstamp) {
            Ok(CcResponse::Bool(b)) => {
                self.last_error = None;
                Ok(b)
            }
            Ok(_) => self.fail(PfqError::ControlFailure(CcOp::GetTstamp)),
            Err(e) => self.fail(e),
        }
    }

    /// Enable the queue: toggles it on the host, fetches the mapping size,
    /// and maps the receive ring. On mmap failure, the toggle is rolled
    /// back so the host and endpoint geometry stay in sync.
    pub fn enable(&mut self) -> Result<()> {
        self.check_open()?;
        if self.enabled {
            return self.fail(PfqError::ControlFailure(CcOp::ToggleQueue));
        }
        self.cc_ack(CcRequest::ToggleQueue(true))?;

        let mem = match self.host.call(CcRequest::GetQueueMem) {
            Ok(CcResponse::U64(v)) => v,
            Ok(_) => {
                let _ = self.host.call(CcRequest::ToggleQueue(false));
                return self.fail(PfqError::ControlFailure(CcOp::GetQueueMem));
            }
            Err(e) => {
                let _ = self.host.call(CcRequest::ToggleQueue(false));
                return self.fail(e);
            }
        };

        let shm = ShmHandle::acquire(&self.host.queue_shm_name(), mem as usize, crate::shm::ShmOpenMode::Open);
        let shm = match shm {
            Ok(s) => s,
            Err(_) => {
                let _ = self.host.call(CcRequest::ToggleQueue(false));
                return self.fail(PfqError::MmapFailure);
            }
        };

        self.shm = Some(shm);
        self.enabled = true;
        self.view = None;
        self.cursor = 0;
        log::debug!("pfq: endpoint {} enabled ({} bytes mapped)", self.id, mem);
        self.last_error = None;
        Ok(())
    }

    /// Disable the queue: drops the mapping before telling the host to
    /// tear the segment down, so this endpoint never holds a dangling
    /// view into memory the host may already be releasing.
    pub fn disable(&mut self) -> Result<()> {
        self.check_open()?;
        if !self.enabled {
            return self.fail(PfqError::ControlFailure(CcOp::ToggleQueue));
        }
        self.shm = None;
        self.view = None;
        self.cursor = 0;
        self.cc_ack(CcRequest::ToggleQueue(false))?;
        self.enabled = false;
        log::debug!("pfq: endpoint {} disabled", self.id);
        Ok(())
    }

    /// Close the endpoint. Returns `Ok(())` on a clean close; a second
    /// call (or any other operation after close) returns `NotOpen`.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(PfqError::NotOpen);
        }
        if self.enabled {
            self.disable()?;
        }
        self.closed = true;
        log::debug!("pfq: endpoint {} closed", self.id);
        Ok(())
    }

    // -- GM -------------------------------------------------------------

    /// Join a group (`gid = host::ANY_GROUP` allocates a fresh one) and
    /// make it the endpoint's default group for `bind`/`unbind`.
    pub fn join_group(&mut self, gid: i32, class_mask: u64, policy: Policy) -> Result<i32> {
        self.check_open()?;
        if matches!(policy, Policy::Undefined) {
            return self.fail(PfqError::UndefinedPolicyOnJoin);
        }
        match self.host.call(CcRequest::GroupJoin(GroupJoinReq { gid, policy, class_mask })) {
            Ok(CcResponse::Gid(g)) => {
                self.gid = g;
                self.last_error = None;
                log::debug!("pfq: endpoint {} joined group {}", self.id, g);
                Ok(g)
            }
            Ok(_) => self.fail(PfqError::ControlFailure(CcOp::GroupJoin)),
            Err(e) => self.fail(e),
        }
    }

    pub fn leave_group(&mut self, gid: i32) -> Result<()> {
        self.check_open()?;
        self.cc_ack(CcRequest::GroupLeave(gid))?;
        if gid == self.gid {
            self.gid = -1;
        }
        Ok(())
    }

    /// The group mask joined by any endpoint, as a 64-bit bitmap
    /// (`groups_mask` / `GET_GROUPS`).
    pub fn groups_mask(&mut self) -> Result<u64> {
        self.check_open()?;
        match self.host.call(CcRequest::GetGroups) {
            Ok(CcResponse::U64(v)) => {
                self.last_error = None;
                Ok(v)
            }
            Ok(_) => self.fail(PfqError::ControlFailure(CcOp::GetGroups)),
            Err(e) => self.fail(e),
        }
    }

    pub fn set_group_steering_function(&mut self, gid: i32, name: &str) -> Result<()> {
        self.check_open()?;
        SteeringReq::validate_name(name)?;
        self.cc_ack(CcRequest::GroupSteerFun(SteeringReq { gid, name: name.to_owned() }))
    }

    pub fn set_group_state(&mut self, gid: i32, state: Vec<u8>) -> Result<()> {
        self.check_open()?;
        self.cc_ack(CcRequest::GroupState(GroupStateReq { gid, state }))
    }

    fn default_group(&mut self) -> Result<i32> {
        if self.gid < 0 {
            return self.fail(PfqError::DefaultGroupUndefined);
        }
        Ok(self.gid)
    }

    pub fn bind(&mut self, dev: &str, queue: i32) -> Result<()> {
        let gid = self.default_group()?;
        self.bind_group(gid, dev, queue)
    }

    pub fn unbind(&mut self, dev: &str, queue: i32) -> Result<()> {
        let gid = self.default_group()?;
        self.unbind_group(gid, dev, queue)
    }

    pub fn bind_group(&mut self, gid: i32, dev: &str, queue: i32) -> Result<()> {
        self.check_open()?;
        let ifindex = match self.host.resolve_ifindex(dev) {
            Ok(i) => i,
            Err(e) => return self.fail(e),
        };
        self.cc_ack(CcRequest::AddBinding(Binding { gid, ifindex, queue }))
    }

    pub fn unbind_group(&mut self, gid: i32, dev: &str, queue: i32) -> Result<()> {
        self.check_open()?;
        let ifindex = match self.host.resolve_ifindex(dev) {
            Ok(i) => i,
            Err(e) => return self.fail(e),
        };
        self.cc_ack(CcRequest::RemoveBinding(Binding { gid, ifindex, queue }))
    }

    // -- TX ---------------------------------------------------------------

    pub fn bind_tx(&mut self, dev: &str, queue: i32) -> Result<()> {
        self.check_open()?;
        let ifindex = match self.host.resolve_ifindex(dev) {
            Ok(i) => i,
            Err(e) => return self.fail(e),
        };
        self.cc_ack(CcRequest::TxBind(Binding { gid: -1, ifindex, queue }))
    }

    /// Transmit one frame synchronously.
    pub fn send(&mut self, frame: &[u8]) -> Result<bool> {
        self.check_open()?;
        match self.host.tx_send(frame) {
            Ok(b) => {
                self.last_error = None;
                Ok(b)
            }
            Err(e) => self.fail(e),
        }
    }

    /// Enqueue one frame for deferred or thread-published transmission,
    /// per `mode` (§4.5). `mode` only selects which call the device
    /// eventually sees it through (`tx_queue_flush` or the worker's
    /// wakeup); the enqueue itself is identical either way.
    pub fn send_async(&mut self, frame: &[u8], _mode: TxMode) -> Result<bool> {
        self.check_open()?;
        match self.host.tx_enqueue(frame) {
            Ok(b) => {
                self.last_error = None;
                Ok(b)
            }
            Err(e) => self.fail(e),
        }
    }

    pub fn tx_queue_flush(&mut self) -> Result<()> {
        self.check_open()?;
        self.cc_ack(CcRequest::TxFlush)
    }

    /// Bind the calling thread to `node` and tell the host to start
    /// publishing deferred frames from it (`TxMode::Threaded`).
    pub fn start_tx_thread(&mut self, node: usize) -> Result<()> {
        self.check_open()?;
        if !crate::cpu_affinity::bind_current_thread(node) {
            log::warn!("pfq: endpoint {} could not pin TX thread to node {}", self.id, node);
        }
        self.cc_ack(CcRequest::TxStart(node as i32))
    }

    pub fn stop_tx_thread(&mut self) -> Result<()> {
        self.check_open()?;
        self.cc_ack(CcRequest::TxStop)
    }

    pub fn wakeup_tx_thread(&mut self) -> Result<()> {
        self.check_open()?;
        self.cc_ack(CcRequest::TxWakeup)
    }

    // -- Stats --------------------------------------------------------

    pub fn get_stats(&mut self) -> Result<Stats> {
        self.check_open()?;
        match self.host.call(CcRequest::GetStats) {
            Ok(CcResponse::Stats(s)) => {
                self.last_error = None;
                Ok(s)
            }
            Ok(_) => self.fail(PfqError::ControlFailure(CcOp::GetStats)),
            Err(e) => self.fail(e),
        }
    }

    pub fn get_group_stats(&mut self, gid: i32) -> Result<Stats> {
        self.check_open()?;
        match self.host.call(CcRequest::GetGroupStats(gid)) {
            Ok(CcResponse::Stats(s)) => {
                self.last_error = None;
                Ok(s)
            }
            Ok(_) => self.fail(PfqError::ControlFailure(CcOp::GetGroupStats)),
            Err(e) => self.fail(e),
        }
    }

    // -- RR / IT ----------------------------------------------------------

    /// Drain one half of the receive ring, blocking up to `timeout_us`
    /// microseconds if the producer is below the low-water mark (§4.4).
    /// Replaces any previously drained view and resets the dispatch
    /// cursor.
    pub fn read(&mut self, timeout_us: i64) -> Result<()> {
        self.check_open()?;
        if !self.enabled {
            return self.fail(PfqError::NotOpen);
        }
        let base_ptr = match &self.shm {
            Some(s) => s.get() as *const u8,
            None => return self.fail(PfqError::NotOpen),
        };
        // Safety: `base_ptr` was just read out of `self.shm`'s mapping,
        // which stays valid for the endpoint's lifetime; the reference
        // below is not borrowed from `self`, so `self.host.poll` can
        // still be called mutably inside the closure.
        let qd: &QueueDescriptor = unsafe { &*(base_ptr as *const QueueDescriptor) };
        let slots = self.slots;
        let slot_size = self.slot_size;
        let result = rr::drain(qd, base_ptr, slots, slot_size, || self.host.poll(timeout_us));
        match result {
            Ok(view) => {
                self.view = Some(view);
                self.cursor = 0;
                self.last_error = None;
                Ok(())
            }
            Err(e) => self.fail(e),
        }
    }

    /// Copy the most recently drained half into `buf` and return the
    /// number of bytes copied (`slot_size * packet_count`, not the
    /// stricter `slots * slot_size` buffer-size check below).
    pub fn recv(&mut self, buf: &mut [u8], timeout_us: i64) -> Result<usize> {
        self.check_open()?;
        let needed = self.slots as usize * self.slot_size as usize;
        if buf.len() < needed {
            return self.fail(PfqError::BufferTooSmall);
        }
        self.read(timeout_us)?;
        let view = self.view.as_ref().expect("read() populates view on success");
        let n = view.copy_len();
        unsafe {
            std::ptr::copy_nonoverlapping(view.base(), buf.as_mut_ptr(), n);
        }
        self.last_error = None;
        Ok(n)
    }

    /// Walk committed packets one at a time, invoking `cb(header, data)`
    /// for each, until `max_packets` have been delivered (`0` means no
    /// cap) or the current half is exhausted. Draws a fresh half via
    /// [`Endpoint::read`] when the cursor has run off the end of the
    /// previous one; otherwise resumes where the last call left off.
    pub fn dispatch<F: FnMut(&PacketHeader, *const u8)>(
        &mut self,
        timeout_us: i64,
        max_packets: u32,
        mut cb: F,
    ) -> Result<u32> {
        self.check_open()?;
        let needs_fresh_half = match &self.view {
            Some(v) => self.cursor >= v.len(),
            None => true,
        };
        if needs_fresh_half {
            self.read(timeout_us)?;
        }

        let mut delivered = 0u32;
        loop {
            if max_packets > 0 && delivered >= max_packets {
                break;
            }
            let Some(view) = &self.view else { break };
            if self.cursor >= view.len() {
                break;
            }
            if !view.wait_committed_at(self.cursor) {
                break;
            }
            let hdr = view.header_at_pos(self.cursor).expect("cursor bounds checked above");
            let data = view
                .data_at_pos(self.cursor, self.offset)
                .expect("cursor bounds checked above");
            cb(hdr, data);
            self.cursor += 1;
            delivered += 1;
        }
        self.last_error = None;
        Ok(delivered)
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.close();
        }
    }
}
