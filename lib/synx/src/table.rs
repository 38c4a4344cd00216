// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Object table: row storage plus the id allocator.
//!
//! Rows are allocated from a free list, falling back to a monotonic index
//! draw bounded by the table capacity. A row returns to the free set only
//! at the end of the release protocol, after its bindings are deregistered
//! and its pending callbacks are flushed, and every activation draws a
//! fresh secure key, so a recycled index can never validate a stale handle.

use dashmap::DashMap;
use parking_lot::Mutex as ParkingMutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::error::{Result, SynxError};
use crate::handle::{SecureKey, SynxHandle};
use crate::row::SynxRow;

/// Default capacity of the object table.
pub const SYNX_MAX_OBJS: usize = 1024;

pub(crate) struct ObjectTable {
    capacity: usize,
    rows: DashMap<u32, Arc<SynxRow>>,
    alloc: ParkingMutex<AllocState>,
    next_key: AtomicU32,
}

struct AllocState {
    free: VecDeque<Arc<SynxRow>>,
    next_index: u32,
    live: usize,
}

impl ObjectTable {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            rows: DashMap::new(),
            alloc: ParkingMutex::new(AllocState {
                free: VecDeque::new(),
                next_index: 0,
                live: 0,
            }),
            next_key: AtomicU32::new(1),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn live(&self) -> usize {
        self.alloc.lock().live
    }

    /// Reserve a free row and draw the secure key for its next occupant.
    pub(crate) fn allocate(&self) -> Result<(Arc<SynxRow>, SecureKey)> {
        let row = {
            let mut alloc = self.alloc.lock();
            if alloc.live >= self.capacity {
                return Err(SynxError::TableFull(self.capacity));
            }
            alloc.live += 1;
            match alloc.free.pop_front() {
                Some(row) => row,
                None => {
                    let index = alloc.next_index;
                    alloc.next_index += 1;
                    let row = Arc::new(SynxRow::new(index));
                    self.rows.insert(index, Arc::clone(&row));
                    row
                }
            }
        };
        Ok((row, self.draw_key()))
    }

    /// Resolve a handle to its row. Key validation happens under the row
    /// lock at the caller, not here.
    pub(crate) fn lookup(&self, handle: SynxHandle) -> Result<Arc<SynxRow>> {
        self.rows
            .get(&handle.index())
            .map(|row| Arc::clone(row.value()))
            .ok_or(SynxError::InvalidHandle(handle))
    }

    /// Return a fully drained row to the free set, making its index
    /// available for reuse.
    pub(crate) fn recycle(&self, row: Arc<SynxRow>) {
        let mut alloc = self.alloc.lock();
        alloc.live -= 1;
        alloc.free.push_back(row);
    }

    pub(crate) fn iter_rows(&self) -> Vec<Arc<SynxRow>> {
        self.rows
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    fn draw_key(&self) -> SecureKey {
        loop {
            let key = self.next_key.fetch_add(1, Ordering::Relaxed);
            if key != 0 {
                return key;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_until_full() {
        let table = ObjectTable::new(2);
        let (row_a, key_a) = table.allocate().unwrap();
        let (row_b, key_b) = table.allocate().unwrap();
        assert_ne!(key_a, key_b);
        assert_ne!(row_a.index(), row_b.index());
        assert!(matches!(table.allocate(), Err(SynxError::TableFull(2))));

        table.recycle(row_a);
        assert!(table.allocate().is_ok());
    }

    #[test]
    fn recycled_row_keeps_index_with_new_key() {
        let table = ObjectTable::new(4);
        let (row, key) = table.allocate().unwrap();
        let index = row.index();
        table.recycle(row);

        let (row, new_key) = table.allocate().unwrap();
        assert_eq!(row.index(), index);
        assert_ne!(new_key, key);
    }

    #[test]
    fn lookup_unknown_index_fails() {
        let table = ObjectTable::new(4);
        let handle = SynxHandle::from_raw(99u64 << 32 | 1);
        assert!(matches!(
            table.lookup(handle),
            Err(SynxError::InvalidHandle(_))
        ));
    }

    #[test]
    fn keys_are_never_zero() {
        let table = ObjectTable::new(4);
        table.next_key.store(u32::MAX, Ordering::Relaxed);
        assert_ne!(table.draw_key(), 0);
        assert_ne!(table.draw_key(), 0);
    }

    #[test]
    fn live_count_tracks_allocations() {
        let table = ObjectTable::new(8);
        assert_eq!(table.live(), 0);
        let (row, _) = table.allocate().unwrap();
        assert_eq!(table.live(), 1);
        table.recycle(row);
        assert_eq!(table.live(), 0);
    }
}
