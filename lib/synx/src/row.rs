// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! One row of the object table.
//!
//! Each row carries its own lock; the table-wide allocator lock is never
//! held while a row lock is taken. A row is reused across many objects over
//! the process lifetime: activation stamps a fresh secure key, and every
//! operation validates the handle's key against it under the row lock.

use parking_lot::{Mutex as ParkingMutex, MutexGuard};
use std::sync::{Arc, Weak};

use crate::bind::BindDescriptor;
use crate::dispatch::KernelCallback;
use crate::error::{Result, SynxError};
use crate::fence::{Fence, FenceWaitHandle};
use crate::handle::{SecureKey, SynxHandle};
use crate::session::{SynxSession, SYNX_PAYLOAD_WORDS};
use crate::status::ObjectState;
use crate::waiter::WaitSlot;

/// Maximum stored length of an object's diagnostic name, in bytes.
pub const SYNX_OBJ_NAME_LEN: usize = 64;

/// Identifier handed back by kernel-callback registration, used to
/// deregister a callback that has not fired yet.
pub type CallbackId = u64;

/// A kernel callback queued on a row, waiting for the signal to move it
/// onto the dispatch path.
pub(crate) struct CallbackRegistration {
    pub(crate) id: CallbackId,
    pub(crate) func: KernelCallback,
}

/// A user payload queued on a row for delivery into its session's queue.
pub(crate) struct UserPayloadRegistration {
    pub(crate) session: Weak<SynxSession>,
    pub(crate) data: [u64; SYNX_PAYLOAD_WORDS],
}

pub(crate) struct SynxRow {
    index: u32,
    state: ParkingMutex<RowInner>,
}

pub(crate) struct RowInner {
    pub(crate) name: Option<String>,
    pub(crate) secure_key: SecureKey,
    pub(crate) fence: Option<Arc<dyn Fence>>,
    pub(crate) fence_wait: Option<FenceWaitHandle>,
    pub(crate) lifecycle: ObjectState,
    pub(crate) bound_synxs: Vec<BindDescriptor>,
    pub(crate) callback_list: Vec<CallbackRegistration>,
    pub(crate) user_payload_list: Vec<UserPayloadRegistration>,
    pub(crate) signaling_id: Option<i64>,
    pub(crate) wait_slot: Option<WaitSlot>,
}

impl SynxRow {
    pub(crate) fn new(index: u32) -> Self {
        Self {
            index,
            state: ParkingMutex::new(RowInner {
                name: None,
                secure_key: 0,
                fence: None,
                fence_wait: None,
                lifecycle: ObjectState::Released,
                bound_synxs: Vec::new(),
                callback_list: Vec::new(),
                user_payload_list: Vec::new(),
                signaling_id: None,
                wait_slot: None,
            }),
        }
    }

    pub(crate) fn index(&self) -> u32 {
        self.index
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, RowInner> {
        self.state.lock()
    }

    /// Begin a new occupancy of this row: stamp the key, attach the fence,
    /// and reset per-object state. The caller guarantees the row came from
    /// the free set.
    pub(crate) fn activate(&self, key: SecureKey, name: Option<&str>, fence: Arc<dyn Fence>) {
        let mut inner = self.state.lock();
        debug_assert_eq!(inner.secure_key, 0, "activating a live row");
        inner.name = name.map(truncate_name);
        inner.secure_key = key;
        inner.fence = Some(fence);
        inner.fence_wait = None;
        inner.lifecycle = ObjectState::Active;
        inner.bound_synxs.clear();
        inner.callback_list.clear();
        inner.user_payload_list.clear();
        inner.signaling_id = None;
        inner.wait_slot = Some(WaitSlot::new());
    }
}

impl RowInner {
    /// Validate a handle's secure key against the row's current occupant.
    ///
    /// Released rows carry key 0, so stale handles fail here regardless of
    /// whether the slot has been reused.
    pub(crate) fn check_key(&self, handle: SynxHandle) -> Result<()> {
        if self.secure_key == 0 || self.secure_key != handle.secure_key() {
            return Err(SynxError::InvalidHandle(handle));
        }
        Ok(())
    }
}

fn truncate_name(name: &str) -> String {
    if name.len() <= SYNX_OBJ_NAME_LEN {
        return name.to_string();
    }
    let mut end = SYNX_OBJ_NAME_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}
