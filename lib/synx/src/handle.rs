// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Client-visible synx handle encoded in a single `u64` value.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

const INDEX_BITS: u32 = 32;
const KEY_BITS: u32 = 32;

const INDEX_SHIFT: u32 = KEY_BITS;
const INDEX_MASK: u64 = ((1u64 << INDEX_BITS) - 1) << INDEX_SHIFT;
const KEY_MASK: u64 = (1u64 << KEY_BITS) - 1;

/// Alias for the per-object authentication token.
///
/// A fresh key is drawn every time a table row is activated, so a handle
/// minted for an earlier occupant of the same row can never validate against
/// the current one. Zero is reserved and never issued.
pub type SecureKey = u32;

/// Public synx handle encoded in a single u64 value.
///
/// Layout (MSB to LSB): `[row index: 32 bits][secure key: 32 bits]`
///
/// The row index addresses a slot in the object table; the secure key
/// authenticates the handle against the slot's current occupant. Both are
/// required for every operation, so a stale handle resolves to
/// `InvalidHandle` rather than aliasing a recycled row.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SynxHandle(u64);

impl SynxHandle {
    /// Create a handle from a row index and the key issued for it.
    pub(crate) fn new(index: u32, key: SecureKey) -> Self {
        let raw = ((index as u64) << INDEX_SHIFT) | (key as u64);
        Self(raw)
    }

    /// Reconstruct a handle from its raw u64 representation.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Return the raw u64 representation.
    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Extract the row index (upper 32 bits).
    pub fn index(&self) -> u32 {
        ((self.0 & INDEX_MASK) >> INDEX_SHIFT) as u32
    }

    /// Extract the secure key (lower 32 bits).
    pub fn secure_key(&self) -> SecureKey {
        (self.0 & KEY_MASK) as SecureKey
    }
}

impl Display for SynxHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SynxHandle(index={}, key={})",
            self.index(),
            self.secure_key()
        )
    }
}
