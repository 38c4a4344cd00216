// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Cross-driver synchronization-object manager.
//!
//! # Overview
//!
//! This crate manages a table of fence-backed handles ("synx objects") that
//! independent producers can create, signal, wait on, and bind to each
//! other's native synchronization primitives:
//!
//! - [`SynxDevice`] — the object table, binding registry, dispatcher, and
//!   session list behind one façade
//! - [`SynxHandle`] — client-visible handle carrying a row index and the
//!   secure key that authenticates it against row reuse
//! - [`Fence`] — the capability set required of any backing fence
//! - [`BindOps`] — the vtable an external fence family registers to
//!   participate in binding
//! - [`SynxSession`] — per-client bounded event queue with poll semantics
//!
//! Signaling contexts never run client code: callbacks and payload
//! deliveries always go through an asynchronous dispatch worker, preserving
//! registration order within each object.

// Public trait API
pub mod bind;
pub mod fence;

// Public types
mod error;
mod handle;
pub mod session;
mod status;

// Core implementation
mod device;
mod dispatch;
mod row;
mod table;
mod waiter;

// ── Re-exports ───────────────────────────────────────────────────────

pub use bind::{
    BindOps, ExternalCallback, ExternalData, SYNX_MAX_BIND_TYPES, SYNX_MAX_NUM_BINDINGS,
    SYNX_TYPE_CSL,
};
pub use device::{ObjectInfo, SynxDevice};
pub use error::{Result, SynxError};
pub use fence::{merge_fences, Fence, FenceArray, FenceCallback, FenceWaitHandle, HostFence};
pub use handle::{SecureKey, SynxHandle};
pub use row::{CallbackId, SYNX_OBJ_NAME_LEN};
pub use session::{
    PollOutcome, SynxSession, UserPayload, SYNX_EVENT_QUEUE_DEPTH, SYNX_PAYLOAD_WORDS,
};
pub use status::{ObjectState, SynxStatus};
pub use table::SYNX_MAX_OBJS;
pub use waiter::SynxAwaiter;
