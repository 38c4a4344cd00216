// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The synx device: object table, binding registry, dispatcher, and session
//! list behind one façade.
//!
//! Locking discipline: the table allocator lock and each row lock are
//! disjoint and never nested; external family operations and fence signals
//! always run outside any row lock, so a family or fence callback that
//! re-enters the device cannot deadlock.

use parking_lot::Mutex as ParkingMutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{trace, warn};

use crate::bind::{
    BindDescriptor, BindOps, BindingRegistry, ExternalCallback, ExternalData,
    SYNX_MAX_NUM_BINDINGS,
};
use crate::dispatch::{DispatchWork, Dispatcher};
use crate::error::{Result, SynxError};
use crate::fence::{merge_fences, Fence, HostFence};
use crate::handle::SynxHandle;
use crate::row::{CallbackId, CallbackRegistration, UserPayloadRegistration};
use crate::session::{PollOutcome, SynxSession, UserPayload, SYNX_PAYLOAD_WORDS};
use crate::status::{ObjectState, SynxStatus};
use crate::table::{ObjectTable, SYNX_MAX_OBJS};
use crate::waiter::SynxAwaiter;

/// Diagnostic snapshot of one live object.
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    pub handle: SynxHandle,
    pub name: Option<String>,
    pub state: ObjectState,
    pub bound_externals: usize,
    pub pending_callbacks: usize,
    pub pending_payloads: usize,
    /// External handle of whichever bound fence triggered the signal, when
    /// the signal came in through a binding.
    pub signaling_id: Option<i64>,
}

/// Process-wide synchronization-object manager.
///
/// Create one per device instance and share it via `Arc`. Construction
/// spawns the dispatch worker, so the device must be created within a Tokio
/// runtime.
pub struct SynxDevice {
    table: ObjectTable,
    registry: BindingRegistry,
    dispatcher: Dispatcher,
    sessions: ParkingMutex<Vec<Arc<SynxSession>>>,
    next_session_id: AtomicU64,
    next_callback_id: AtomicU64,
    shutdown: AtomicBool,
}

impl SynxDevice {
    pub fn new() -> Arc<Self> {
        Self::with_capacity(SYNX_MAX_OBJS)
    }

    /// Create a device with a non-default object-table capacity.
    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            table: ObjectTable::new(capacity),
            registry: BindingRegistry::new(),
            dispatcher: Dispatcher::new(),
            sessions: ParkingMutex::new(Vec::new()),
            next_session_id: AtomicU64::new(1),
            next_callback_id: AtomicU64::new(1),
            shutdown: AtomicBool::new(false),
        })
    }

    // ── Object lifecycle ──────────────────────────────────────────────

    /// Create a new object backed by a host-signaled fence.
    pub fn create(self: &Arc<Self>, name: Option<&str>) -> Result<SynxHandle> {
        self.create_with_fence(name, HostFence::new())
    }

    /// Create a new object wrapping a caller-supplied fence.
    pub fn create_with_fence(
        self: &Arc<Self>,
        name: Option<&str>,
        fence: Arc<dyn Fence>,
    ) -> Result<SynxHandle> {
        if self.is_shutdown() {
            return Err(SynxError::ShuttingDown);
        }
        let (row, key) = self.table.allocate()?;
        let handle = SynxHandle::new(row.index(), key);
        row.activate(key, name, Arc::clone(&fence));
        trace!(%handle, name = name.unwrap_or_default(), "created synx object");

        // Hook the fence into the signal path. If the fence has already
        // signaled this fires inline and the row transitions before we
        // return the handle.
        let weak = Arc::downgrade(self);
        let wait = fence.wait_for_signal_async(Box::new(move |status| {
            if let Some(device) = weak.upgrade() {
                device.signal_row(handle, status, None);
            }
        }));
        row.lock().fence_wait = Some(wait);
        Ok(handle)
    }

    /// Non-blocking lifecycle query.
    pub fn get_status(&self, handle: SynxHandle) -> Result<ObjectState> {
        let row = self.table.lookup(handle)?;
        let inner = row.lock();
        inner.check_key(handle)?;
        Ok(inner.lifecycle)
    }

    /// Signal the object's backing fence. Fails with `AlreadySignaled` if
    /// the row has left the active state.
    pub fn signal(&self, handle: SynxHandle, status: SynxStatus) -> Result<()> {
        let row = self.table.lookup(handle)?;
        let fence = {
            let inner = row.lock();
            inner.check_key(handle)?;
            if !inner.lifecycle.is_active() {
                return Err(SynxError::AlreadySignaled(handle));
            }
            inner
                .fence
                .clone()
                .ok_or(SynxError::InvalidHandle(handle))?
        };
        fence.signal(status);
        Ok(())
    }

    /// Return a clone of the object's backing fence.
    fn backing_fence(&self, handle: SynxHandle) -> Result<Arc<dyn Fence>> {
        let row = self.table.lookup(handle)?;
        let inner = row.lock();
        inner.check_key(handle)?;
        inner
            .fence
            .clone()
            .ok_or(SynxError::InvalidHandle(handle))
    }

    /// Create a future resolving with the object's terminal status.
    pub fn awaiter(&self, handle: SynxHandle) -> Result<SynxAwaiter> {
        let row = self.table.lookup(handle)?;
        let inner = row.lock();
        inner.check_key(handle)?;
        match inner.lifecycle {
            ObjectState::Active => Ok(inner
                .wait_slot
                .as_ref()
                .expect("active row has a wait slot")
                .awaiter()),
            ObjectState::Signaled(status) => Ok(SynxAwaiter::immediate(status)),
            ObjectState::Released => Err(SynxError::InvalidHandle(handle)),
        }
    }

    /// Wait for the object to reach a terminal status, bounded by `timeout`.
    pub async fn wait(&self, handle: SynxHandle, timeout: Duration) -> Result<SynxStatus> {
        let awaiter = self.awaiter(handle)?;
        tokio::time::timeout(timeout, awaiter)
            .await
            .map_err(|_| SynxError::Timeout(handle))
    }

    /// Create a new object that signals once every input has signaled.
    ///
    /// The merged status is `Success` when all inputs succeed, otherwise the
    /// first non-success input status.
    pub fn merge(self: &Arc<Self>, inputs: &[SynxHandle]) -> Result<SynxHandle> {
        if inputs.is_empty() {
            return Err(SynxError::EmptyMerge);
        }
        let fences = inputs
            .iter()
            .map(|handle| self.backing_fence(*handle))
            .collect::<Result<Vec<_>>>()?;
        self.create_with_fence(None, merge_fences(&fences))
    }

    /// Tear down an object: flush pending registrations with `Released`,
    /// deregister every binding, resolve the backing fence, and return the
    /// row to the free set. A second release fails with `InvalidHandle`.
    pub fn release(&self, handle: SynxHandle) -> Result<()> {
        let row = self.table.lookup(handle)?;
        let (bound, fence, fence_wait, was_active) = {
            let mut inner = row.lock();
            inner.check_key(handle)?;
            let was_active = inner.lifecycle.is_active();
            for reg in inner.callback_list.drain(..) {
                self.dispatcher.enqueue(DispatchWork::Kernel {
                    handle,
                    func: reg.func,
                    status: SynxStatus::Released,
                });
            }
            for reg in inner.user_payload_list.drain(..) {
                self.dispatcher.enqueue(DispatchWork::Payload {
                    session: reg.session,
                    payload: UserPayload {
                        handle,
                        status: SynxStatus::Released,
                        data: reg.data,
                    },
                });
            }
            if let Some(slot) = inner.wait_slot.take() {
                slot.complete(SynxStatus::Released);
            }
            let bound = std::mem::take(&mut inner.bound_synxs);
            let fence = inner.fence.take();
            let fence_wait = inner.fence_wait.take();
            inner.lifecycle = ObjectState::Released;
            inner.secure_key = 0;
            inner.name = None;
            inner.signaling_id = None;
            (bound, fence, fence_wait, was_active)
        };

        // External teardown runs outside the row lock. Deregistration
        // failures are the external driver's resource to leak, not ours.
        for desc in &bound {
            match self.registry.ops_for(desc.external_type) {
                Ok(ops) => {
                    if let Err(err) = ops.deregister_callback(desc.data, desc.external_handle) {
                        warn!(
                            %handle,
                            external_handle = desc.external_handle,
                            %err,
                            "external deregistration failed during release"
                        );
                    }
                }
                Err(err) => {
                    warn!(%handle, %err, "bind ops missing during release");
                }
            }
        }

        if let Some(fence) = &fence {
            if let Some(wait) = fence_wait {
                fence.cancel_wait(wait);
            }
            if was_active {
                // Resolve fence-level consumers (merges, exported waiters)
                // that would otherwise wait forever on an abandoned fence.
                fence.signal(SynxStatus::Released);
            }
        }
        drop(fence);

        trace!(%handle, "released synx object");
        // The id becomes reusable only now, with bindings deregistered and
        // registrations flushed.
        self.table.recycle(row);
        Ok(())
    }

    // ── Kernel callbacks ──────────────────────────────────────────────

    /// Register a callback to run with the object's terminal status.
    ///
    /// Callbacks never run in the caller's or the signaler's stack; a
    /// registration on an already-signaled row goes through the same
    /// asynchronous dispatch path as everything else.
    pub fn register_callback<F>(&self, handle: SynxHandle, func: F) -> Result<CallbackId>
    where
        F: FnOnce(SynxHandle, SynxStatus) + Send + 'static,
    {
        let row = self.table.lookup(handle)?;
        let id = self.next_callback_id.fetch_add(1, Ordering::Relaxed);
        let mut inner = row.lock();
        inner.check_key(handle)?;
        match inner.lifecycle {
            ObjectState::Active => {
                inner.callback_list.push(CallbackRegistration {
                    id,
                    func: Box::new(func),
                });
            }
            ObjectState::Signaled(status) => {
                self.dispatcher.enqueue(DispatchWork::Kernel {
                    handle,
                    func: Box::new(func),
                    status,
                });
            }
            ObjectState::Released => return Err(SynxError::InvalidHandle(handle)),
        }
        Ok(id)
    }

    /// Remove a callback that has not fired yet.
    pub fn deregister_callback(&self, handle: SynxHandle, id: CallbackId) -> Result<()> {
        let row = self.table.lookup(handle)?;
        let mut inner = row.lock();
        inner.check_key(handle)?;
        match inner.callback_list.iter().position(|reg| reg.id == id) {
            Some(pos) => {
                inner.callback_list.remove(pos);
                Ok(())
            }
            None => Err(SynxError::CallbackNotFound(handle, id)),
        }
    }

    // ── External bindings ─────────────────────────────────────────────

    /// Install the operation vtable for one external fence family.
    pub fn register_bind_ops(&self, external_type: u32, ops: Arc<dyn BindOps>) -> Result<()> {
        self.registry.install(external_type, ops)
    }

    /// Bind an external fence to an object, so the external primitive's
    /// signal forwards into the core and vice versa.
    pub fn bind(
        self: &Arc<Self>,
        handle: SynxHandle,
        external_type: u32,
        external_handle: i64,
    ) -> Result<()> {
        let ops = self.registry.ops_for(external_type)?;
        let row = self.table.lookup(handle)?;

        let data = {
            let inner = row.lock();
            inner.check_key(handle)?;
            if !inner.lifecycle.is_active() {
                return Err(SynxError::InvalidHandle(handle));
            }
            if inner.bound_synxs.len() >= SYNX_MAX_NUM_BINDINGS {
                return Err(SynxError::BindLimitExceeded(handle));
            }
            if inner
                .bound_synxs
                .iter()
                .any(|d| d.external_type == external_type && d.external_handle == external_handle)
            {
                return Err(SynxError::DuplicateBind(handle, external_handle));
            }
            ExternalData {
                handle,
                secure_key: inner.secure_key,
            }
        };

        let weak = Arc::downgrade(self);
        let trampoline: ExternalCallback = Arc::new(move |data: ExternalData, status| {
            if let Some(device) = weak.upgrade() {
                device.external_signal_cb(data, status, external_handle);
            }
        });
        ops.register_callback(trampoline, data, external_handle)?;
        if let Err(err) = ops.enable_signaling(external_handle) {
            let _ = ops.deregister_callback(data, external_handle);
            return Err(err);
        }

        // Re-validate under the row lock: the row may have signaled or been
        // released while the external registration was in flight.
        {
            let mut inner = row.lock();
            if inner.secure_key != handle.secure_key() || !inner.lifecycle.is_active() {
                drop(inner);
                if let Err(err) = ops.deregister_callback(data, external_handle) {
                    warn!(%handle, %err, "rollback deregistration failed");
                }
                return Err(SynxError::InvalidHandle(handle));
            }
            if inner.bound_synxs.len() >= SYNX_MAX_NUM_BINDINGS {
                drop(inner);
                if let Err(err) = ops.deregister_callback(data, external_handle) {
                    warn!(%handle, %err, "rollback deregistration failed");
                }
                return Err(SynxError::BindLimitExceeded(handle));
            }
            inner.bound_synxs.push(BindDescriptor {
                external_type,
                external_handle,
                data,
            });
        }
        trace!(%handle, external_type, external_handle, "bound external fence");
        Ok(())
    }

    /// Remove one binding and deregister it from its external family.
    pub fn unbind(
        &self,
        handle: SynxHandle,
        external_type: u32,
        external_handle: i64,
    ) -> Result<()> {
        let row = self.table.lookup(handle)?;
        let desc = {
            let mut inner = row.lock();
            inner.check_key(handle)?;
            let pos = inner
                .bound_synxs
                .iter()
                .position(|d| d.external_type == external_type && d.external_handle == external_handle)
                .ok_or(SynxError::BindNotFound(handle, external_handle))?;
            inner.bound_synxs.remove(pos)
        };
        match self.registry.ops_for(desc.external_type) {
            Ok(ops) => {
                if let Err(err) = ops.deregister_callback(desc.data, desc.external_handle) {
                    warn!(%handle, %err, "external deregistration failed during unbind");
                }
            }
            Err(err) => {
                warn!(%handle, %err, "bind ops missing during unbind");
            }
        }
        Ok(())
    }

    /// Entry point for external drivers whose primitive fired: forward the
    /// signal into the family, which invokes every registered trampoline.
    pub fn signal_external(
        &self,
        external_type: u32,
        external_handle: i64,
        status: SynxStatus,
    ) -> Result<()> {
        let ops = self.registry.ops_for(external_type)?;
        ops.signal(external_handle, status)
    }

    /// Diagnostic view of an object's current bindings.
    pub fn bound_externals(&self, handle: SynxHandle) -> Result<Vec<(u32, i64)>> {
        let row = self.table.lookup(handle)?;
        let inner = row.lock();
        inner.check_key(handle)?;
        Ok(inner
            .bound_synxs
            .iter()
            .map(|d| (d.external_type, d.external_handle))
            .collect())
    }

    /// Diagnostic snapshot of one object, the shape surfaced by debug dumps.
    pub fn object_info(&self, handle: SynxHandle) -> Result<ObjectInfo> {
        let row = self.table.lookup(handle)?;
        let inner = row.lock();
        inner.check_key(handle)?;
        Ok(ObjectInfo {
            handle,
            name: inner.name.clone(),
            state: inner.lifecycle,
            bound_externals: inner.bound_synxs.len(),
            pending_callbacks: inner.callback_list.len(),
            pending_payloads: inner.user_payload_list.len(),
            signaling_id: inner.signaling_id,
        })
    }

    // ── Sessions ──────────────────────────────────────────────────────

    pub fn create_session(&self) -> Arc<SynxSession> {
        let session = SynxSession::new(self.next_session_id.fetch_add(1, Ordering::Relaxed));
        self.sessions.lock().push(Arc::clone(&session));
        session
    }

    /// Queue an opaque payload for delivery into `session` when the object
    /// reaches a terminal status.
    pub fn register_payload(
        &self,
        session: &Arc<SynxSession>,
        handle: SynxHandle,
        data: [u64; SYNX_PAYLOAD_WORDS],
    ) -> Result<()> {
        if session.is_closed() {
            return Err(SynxError::SessionClosed);
        }
        let row = self.table.lookup(handle)?;
        let mut inner = row.lock();
        inner.check_key(handle)?;
        match inner.lifecycle {
            ObjectState::Active => {
                inner.user_payload_list.push(UserPayloadRegistration {
                    session: Arc::downgrade(session),
                    data,
                });
            }
            ObjectState::Signaled(status) => {
                self.dispatcher.enqueue(DispatchWork::Payload {
                    session: Arc::downgrade(session),
                    payload: UserPayload {
                        handle,
                        status,
                        data,
                    },
                });
            }
            ObjectState::Released => return Err(SynxError::InvalidHandle(handle)),
        }
        Ok(())
    }

    /// Block until the session has at least one delivered payload or the
    /// timeout elapses, then drain the queue.
    pub async fn poll(
        &self,
        session: &Arc<SynxSession>,
        timeout: Duration,
    ) -> Result<PollOutcome> {
        session.poll(timeout).await
    }

    /// Close a session: wake its pollers, drop its queue, and purge its
    /// pending registrations from every live row.
    pub fn close_session(&self, session: &Arc<SynxSession>) {
        session.close();
        self.sessions.lock().retain(|s| !Arc::ptr_eq(s, session));
        for row in self.table.iter_rows() {
            let mut inner = row.lock();
            inner.user_payload_list.retain(|reg| {
                reg.session
                    .upgrade()
                    .map(|s| !Arc::ptr_eq(&s, session))
                    .unwrap_or(false)
            });
        }
    }

    // ── Maintenance ───────────────────────────────────────────────────

    /// Wait until every dispatch item enqueued before this call has run.
    pub async fn flush(&self) {
        self.dispatcher.flush().await;
    }

    /// Reject new creates, tear down every live object, and drain the
    /// dispatch queue.
    pub async fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for row in self.table.iter_rows() {
            let handle = {
                let inner = row.lock();
                if inner.secure_key == 0 {
                    continue;
                }
                SynxHandle::new(row.index(), inner.secure_key)
            };
            if let Err(err) = self.release(handle) {
                trace!(%handle, %err, "row vanished during shutdown");
            }
        }
        self.dispatcher.flush().await;
    }

    /// Number of live objects in the table.
    pub fn live_objects(&self) -> usize {
        self.table.live()
    }

    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    // ── Signal transition ─────────────────────────────────────────────

    /// Move a row to SIGNALED and hand its registrations to the dispatcher.
    ///
    /// Runs in whatever context the fence or an external family signals in,
    /// so it must not block and must not run client code: one short row
    /// lock, then non-blocking enqueues.
    fn signal_row(&self, handle: SynxHandle, status: SynxStatus, signaling_id: Option<i64>) {
        let Ok(row) = self.table.lookup(handle) else {
            trace!(%handle, "dropping signal for unknown row");
            return;
        };
        let (bound, fence) = {
            let mut inner = row.lock();
            if inner.secure_key != handle.secure_key() {
                warn!(
                    %handle,
                    error = %SynxError::AuthenticationFailure(handle),
                    "dropping stale signal"
                );
                return;
            }
            if !inner.lifecycle.is_active() {
                return;
            }
            inner.lifecycle = ObjectState::Signaled(status);
            inner.signaling_id = signaling_id;
            for reg in inner.callback_list.drain(..) {
                self.dispatcher.enqueue(DispatchWork::Kernel {
                    handle,
                    func: reg.func,
                    status,
                });
            }
            for reg in inner.user_payload_list.drain(..) {
                self.dispatcher.enqueue(DispatchWork::Payload {
                    session: reg.session,
                    payload: UserPayload {
                        handle,
                        status,
                        data: reg.data,
                    },
                });
            }
            if let Some(slot) = &inner.wait_slot {
                slot.complete(status);
            }
            (inner.bound_synxs.clone(), inner.fence.clone())
        };

        // Outside the row lock: resolve the backing fence and propagate the
        // signal to bound external families, skipping whichever family the
        // signal came from.
        if let Some(fence) = fence {
            fence.signal(status);
        }
        for desc in bound {
            if Some(desc.external_handle) == signaling_id {
                continue;
            }
            match self.registry.ops_for(desc.external_type) {
                Ok(ops) => {
                    if let Err(err) = ops.signal(desc.external_handle, status) {
                        warn!(
                            %handle,
                            external_handle = desc.external_handle,
                            %err,
                            "failed to propagate signal to external fence"
                        );
                    }
                }
                Err(err) => {
                    warn!(%handle, %err, "bind ops missing during signal propagation");
                }
            }
        }
    }

    /// Trampoline target for bound external fences. Authenticates the
    /// bind-time secure key before applying the signal; a stale callback
    /// addressed to a released or recycled row is dropped with a log.
    fn external_signal_cb(&self, data: ExternalData, status: SynxStatus, signaling_id: i64) {
        let Ok(row) = self.table.lookup(data.handle) else {
            warn!(handle = %data.handle, "dropping external signal for unknown row");
            return;
        };
        {
            let inner = row.lock();
            if inner.secure_key != data.secure_key {
                warn!(
                    handle = %data.handle,
                    error = %SynxError::AuthenticationFailure(data.handle),
                    "dropping stale external signal"
                );
                return;
            }
        }
        self.signal_row(data.handle, status, Some(signaling_id));
    }
}
