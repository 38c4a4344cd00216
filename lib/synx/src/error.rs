// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

use crate::handle::SynxHandle;
use crate::row::CallbackId;

/// Errors surfaced by synx operations.
///
/// Capacity errors and timeouts are reported to the caller to decide; nothing
/// in this crate retries internally. Authentication failures on the external
/// signal path are dropped with a log instead of propagating, but the variant
/// is kept here so the drop sites can name it.
#[derive(Debug, Error)]
pub enum SynxError {
    #[error("{0} does not map to a live object")]
    InvalidHandle(SynxHandle),

    #[error("Object table is at capacity ({0} rows)")]
    TableFull(usize),

    #[error("{0} already carries the maximum number of bindings")]
    BindLimitExceeded(SynxHandle),

    #[error("No bind operations registered for external type {0}")]
    UnknownType(u32),

    #[error("Bind operations already installed for external type {0}")]
    AlreadyBound(u32),

    #[error("{0} is already bound to external handle {1}")]
    DuplicateBind(SynxHandle, i64),

    #[error("{0} has no binding for external handle {1}")]
    BindNotFound(SynxHandle, i64),

    #[error("Secure key mismatch for {0}")]
    AuthenticationFailure(SynxHandle),

    #[error("{0} is no longer active")]
    AlreadySignaled(SynxHandle),

    #[error("No pending callback {1} registered on {0}")]
    CallbackNotFound(SynxHandle, CallbackId),

    #[error("Session has been closed")]
    SessionClosed,

    #[error("Cannot merge an empty handle list")]
    EmptyMerge,

    #[error("Wait on {0} timed out")]
    Timeout(SynxHandle),

    #[error("Device shutdown in progress")]
    ShuttingDown,
}

pub type Result<T> = std::result::Result<T, SynxError>;
