// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The fence collaborator interface.
//!
//! A fence is an opaque signalable object representing "work completed" from
//! some producer. The core never inspects fence internals; it only observes
//! completion through the callbacks registered here. [`HostFence`] is the
//! software-signaled implementation backing plain `create` calls, and
//! [`merge_fences`] produces a fence-array that completes once every child
//! has completed.

use parking_lot::Mutex as ParkingMutex;
use std::sync::{Arc, Weak};

use crate::status::SynxStatus;

/// Token returned by [`Fence::wait_for_signal_async`], used to cancel the wait.
pub type FenceWaitHandle = u64;

/// Completion callback invoked when a fence signals.
///
/// May run in whatever context the producer signals from; implementations
/// must invoke it outside their own locks.
pub type FenceCallback = Box<dyn FnOnce(SynxStatus) + Send>;

/// Capability set the core requires of any backing fence.
pub trait Fence: Send + Sync {
    /// Non-blocking check for completion.
    fn is_signaled(&self) -> bool;

    /// The terminal status, or `None` while pending.
    fn current_status(&self) -> Option<SynxStatus>;

    /// Register `callback` to run when the fence signals.
    ///
    /// If the fence has already signaled, the callback is invoked inline
    /// before this method returns. Exactly one invocation either way.
    fn wait_for_signal_async(&self, callback: FenceCallback) -> FenceWaitHandle;

    /// Cancel a registered wait. Canceling an already-fired or unknown wait
    /// is a no-op.
    fn cancel_wait(&self, wait: FenceWaitHandle);

    /// Signal the fence. Signaling an already-signaled fence is a no-op;
    /// the first status wins.
    fn signal(&self, status: SynxStatus);
}

struct WaiterList {
    status: Option<SynxStatus>,
    waiters: Vec<(FenceWaitHandle, FenceCallback)>,
    next_wait: FenceWaitHandle,
}

impl WaiterList {
    fn new() -> Self {
        Self {
            status: None,
            waiters: Vec::with_capacity(2),
            next_wait: 1,
        }
    }
}

/// Software-signaled fence owned by the host.
pub struct HostFence {
    state: ParkingMutex<WaiterList>,
}

impl HostFence {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: ParkingMutex::new(WaiterList::new()),
        })
    }
}

impl Fence for HostFence {
    fn is_signaled(&self) -> bool {
        self.state.lock().status.is_some()
    }

    fn current_status(&self) -> Option<SynxStatus> {
        self.state.lock().status
    }

    fn wait_for_signal_async(&self, callback: FenceCallback) -> FenceWaitHandle {
        let fire = {
            let mut state = self.state.lock();
            match state.status {
                Some(status) => Some(status),
                None => {
                    let wait = state.next_wait;
                    state.next_wait += 1;
                    state.waiters.push((wait, callback));
                    return wait;
                }
            }
        };
        // Already signaled: invoke inline, outside the lock.
        if let Some(status) = fire {
            callback(status);
        }
        0
    }

    fn cancel_wait(&self, wait: FenceWaitHandle) {
        let mut state = self.state.lock();
        state.waiters.retain(|(id, _)| *id != wait);
    }

    fn signal(&self, status: SynxStatus) {
        let waiters = {
            let mut state = self.state.lock();
            if state.status.is_some() {
                return;
            }
            state.status = Some(status);
            std::mem::take(&mut state.waiters)
        };
        for (_, callback) in waiters {
            callback(status);
        }
    }
}

struct FenceArrayState {
    pending: usize,
    first_failure: Option<SynxStatus>,
    waiters: WaiterList,
}

/// Fence that completes once all of its children have completed.
///
/// The aggregate status is `Success` when every child succeeded, otherwise
/// the first non-success child status observed.
pub struct FenceArray {
    state: ParkingMutex<FenceArrayState>,
}

impl FenceArray {
    pub fn new(children: &[Arc<dyn Fence>]) -> Arc<Self> {
        let array = Arc::new(Self {
            state: ParkingMutex::new(FenceArrayState {
                pending: children.len(),
                first_failure: None,
                waiters: WaiterList::new(),
            }),
        });
        for child in children {
            let weak: Weak<FenceArray> = Arc::downgrade(&array);
            child.wait_for_signal_async(Box::new(move |status| {
                if let Some(array) = weak.upgrade() {
                    array.child_signaled(status);
                }
            }));
        }
        if children.is_empty() {
            array.signal(SynxStatus::Success);
        }
        array
    }

    fn child_signaled(&self, status: SynxStatus) {
        let aggregate = {
            let mut state = self.state.lock();
            if state.waiters.status.is_some() {
                return;
            }
            if status != SynxStatus::Success && state.first_failure.is_none() {
                state.first_failure = Some(status);
            }
            state.pending -= 1;
            if state.pending > 0 {
                return;
            }
            state.first_failure.unwrap_or(SynxStatus::Success)
        };
        self.signal(aggregate);
    }
}

impl Fence for FenceArray {
    fn is_signaled(&self) -> bool {
        self.state.lock().waiters.status.is_some()
    }

    fn current_status(&self) -> Option<SynxStatus> {
        self.state.lock().waiters.status
    }

    fn wait_for_signal_async(&self, callback: FenceCallback) -> FenceWaitHandle {
        let fire = {
            let mut state = self.state.lock();
            match state.waiters.status {
                Some(status) => Some(status),
                None => {
                    let wait = state.waiters.next_wait;
                    state.waiters.next_wait += 1;
                    state.waiters.waiters.push((wait, callback));
                    return wait;
                }
            }
        };
        if let Some(status) = fire {
            callback(status);
        }
        0
    }

    fn cancel_wait(&self, wait: FenceWaitHandle) {
        let mut state = self.state.lock();
        state.waiters.waiters.retain(|(id, _)| *id != wait);
    }

    fn signal(&self, status: SynxStatus) {
        let waiters = {
            let mut state = self.state.lock();
            if state.waiters.status.is_some() {
                return;
            }
            state.waiters.status = Some(status);
            std::mem::take(&mut state.waiters.waiters)
        };
        for (_, callback) in waiters {
            callback(status);
        }
    }
}

/// Merge a set of fences into a single fence-array fence.
pub fn merge_fences(children: &[Arc<dyn Fence>]) -> Arc<dyn Fence> {
    FenceArray::new(children)
}
