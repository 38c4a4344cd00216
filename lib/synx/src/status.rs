// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Status types shared across the object table, dispatcher, and sessions.

use serde::{Deserialize, Serialize};

/// Terminal status delivered to callbacks, payloads, and waiters.
///
/// `Released` is a valid delivery status, not a fault: it is stamped onto
/// registrations whose row was torn down before the underlying fence fired.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SynxStatus {
    /// The underlying fence completed successfully.
    Success,
    /// The underlying fence completed with an error.
    Error,
    /// The object was released before its fence completed.
    Released,
}

/// Lifecycle state of one object-table row, as reported by status queries.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ObjectState {
    /// The row is live and its fence has not signaled yet.
    Active,
    /// The fence signaled; the recorded status is delivered to every
    /// registration exactly once.
    Signaled(SynxStatus),
    /// The row has been torn down and its slot returned to the free set.
    Released,
}

impl ObjectState {
    /// Returns `true` while the row can still accept registrations and binds.
    pub fn is_active(&self) -> bool {
        matches!(self, ObjectState::Active)
    }

    /// The terminal status, if the row has reached one.
    pub fn terminal_status(&self) -> Option<SynxStatus> {
        match self {
            ObjectState::Active => None,
            ObjectState::Signaled(status) => Some(*status),
            ObjectState::Released => Some(SynxStatus::Released),
        }
    }
}
