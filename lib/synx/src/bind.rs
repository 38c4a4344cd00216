// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Binding registry for external fence families.
//!
//! Each registered family supplies an operation vtable; the core talks to
//! every external synchronization primitive exclusively through it. A
//! family's callback receives the [`ExternalData`] token issued at bind
//! time, and the core re-validates its secure key before applying the
//! signal, so a callback that outlives its row is dropped rather than
//! applied to a recycled slot.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::error::{Result, SynxError};
use crate::handle::{SecureKey, SynxHandle};
use crate::status::SynxStatus;

/// Maximum number of external fence families that can be registered.
pub const SYNX_MAX_BIND_TYPES: usize = 8;

/// Maximum number of external fences bound to a single object.
pub const SYNX_MAX_NUM_BINDINGS: usize = 8;

/// External type tag for the camera subsystem's native fences.
pub const SYNX_TYPE_CSL: u32 = 0;

/// Token passed to an external family when a callback is registered, and
/// handed back by the family when its primitive fires.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ExternalData {
    pub handle: SynxHandle,
    pub secure_key: SecureKey,
}

/// Trampoline the core registers with an external family. Invoked by the
/// family when its primitive signals.
pub type ExternalCallback = Arc<dyn Fn(ExternalData, SynxStatus) + Send + Sync>;

/// Operation vtable one external fence family must provide.
pub trait BindOps: Send + Sync {
    /// Register `callback` to be invoked with `data` when `external_handle`
    /// signals.
    fn register_callback(
        &self,
        callback: ExternalCallback,
        data: ExternalData,
        external_handle: i64,
    ) -> Result<()>;

    /// Remove a callback previously registered with the same `data` and
    /// `external_handle`.
    fn deregister_callback(&self, data: ExternalData, external_handle: i64) -> Result<()>;

    /// Arm signaling on the external primitive. Families that signal
    /// unconditionally keep the default no-op.
    fn enable_signaling(&self, _external_handle: i64) -> Result<()> {
        Ok(())
    }

    /// Signal the external primitive with the given status.
    fn signal(&self, external_handle: i64, status: SynxStatus) -> Result<()>;
}

/// One bind established on a row.
#[derive(Clone)]
pub(crate) struct BindDescriptor {
    pub(crate) external_type: u32,
    pub(crate) external_handle: i64,
    pub(crate) data: ExternalData,
}

/// Fixed array of per-family vtables, indexed by external type tag.
pub(crate) struct BindingRegistry {
    ops: RwLock<[Option<Arc<dyn BindOps>>; SYNX_MAX_BIND_TYPES]>,
}

impl BindingRegistry {
    pub(crate) fn new() -> Self {
        Self {
            ops: RwLock::new(std::array::from_fn(|_| None)),
        }
    }

    /// Install the vtable for one external type. Installing over an
    /// occupied slot is rejected; families register exactly once.
    pub(crate) fn install(&self, external_type: u32, ops: Arc<dyn BindOps>) -> Result<()> {
        let slot = usize::try_from(external_type)
            .ok()
            .filter(|t| *t < SYNX_MAX_BIND_TYPES)
            .ok_or(SynxError::UnknownType(external_type))?;
        let mut table = self.ops.write();
        if table[slot].is_some() {
            return Err(SynxError::AlreadyBound(external_type));
        }
        table[slot] = Some(ops);
        Ok(())
    }

    pub(crate) fn ops_for(&self, external_type: u32) -> Result<Arc<dyn BindOps>> {
        usize::try_from(external_type)
            .ok()
            .filter(|t| *t < SYNX_MAX_BIND_TYPES)
            .and_then(|t| self.ops.read()[t].clone())
            .ok_or(SynxError::UnknownType(external_type))
    }
}
