// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Waiter synchronization for object signals.
//!
//! Completion status and waker registration live under a single lock to
//! prevent lost wakeups. A fresh slot is created each time a row is
//! activated, so a waiter holds its own generation's state directly and is
//! unaffected by the row being recycled underneath it.

use parking_lot::Mutex as ParkingMutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use crate::status::SynxStatus;

pub(crate) struct WaitSlot {
    state: Arc<WaitSlotState>,
}

struct WaitSlotState {
    inner: ParkingMutex<WaitSlotInner>,
    completed: AtomicBool,
}

struct WaitSlotInner {
    completion: Option<SynxStatus>,
    wakers: Vec<Waker>,
}

impl WaitSlot {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(WaitSlotState {
                inner: ParkingMutex::new(WaitSlotInner {
                    completion: None,
                    wakers: Vec::with_capacity(2),
                }),
                completed: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn awaiter(&self) -> SynxAwaiter {
        SynxAwaiter::pending(Arc::clone(&self.state))
    }

    /// Record the terminal status and wake every registered waiter.
    /// First completion wins; later calls are no-ops.
    pub(crate) fn complete(&self, status: SynxStatus) {
        if self.state.completed.swap(true, Ordering::AcqRel) {
            return;
        }
        let wakers = {
            let mut guard = self.state.inner.lock();
            guard.completion = Some(status);
            std::mem::take(&mut guard.wakers)
        };
        for waker in wakers {
            waker.wake();
        }
    }
}

/// Future that resolves with the terminal status of one synx object.
///
/// Usable in `tokio::select!` and pollable multiple times; waker
/// deduplication inside the slot lock prevents unbounded growth.
pub struct SynxAwaiter {
    state: Option<Arc<WaitSlotState>>,
    immediate: Option<SynxStatus>,
}

impl SynxAwaiter {
    /// A waiter that immediately resolves with the given status.
    pub(crate) fn immediate(status: SynxStatus) -> Self {
        Self {
            state: None,
            immediate: Some(status),
        }
    }

    fn pending(state: Arc<WaitSlotState>) -> Self {
        Self {
            state: Some(state),
            immediate: None,
        }
    }
}

impl Future for SynxAwaiter {
    type Output = SynxStatus;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Some(status) = this.immediate {
            return Poll::Ready(status);
        }

        let state = this
            .state
            .as_ref()
            .expect("SynxAwaiter with no slot or immediate status");

        let mut guard = state.inner.lock();
        if let Some(status) = guard.completion {
            return Poll::Ready(status);
        }
        if !guard.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            guard.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn awaiter_resolves_after_complete() {
        let slot = WaitSlot::new();
        let awaiter = slot.awaiter();

        let task = tokio::spawn(awaiter);
        tokio::task::yield_now().await;
        slot.complete(SynxStatus::Success);
        assert_eq!(task.await.unwrap(), SynxStatus::Success);
    }

    #[tokio::test]
    async fn awaiter_resolves_when_completed_first() {
        let slot = WaitSlot::new();
        slot.complete(SynxStatus::Error);
        assert_eq!(slot.awaiter().await, SynxStatus::Error);
    }

    #[tokio::test]
    async fn first_completion_wins() {
        let slot = WaitSlot::new();
        slot.complete(SynxStatus::Released);
        slot.complete(SynxStatus::Success);
        assert_eq!(slot.awaiter().await, SynxStatus::Released);
    }

    #[tokio::test]
    async fn immediate_awaiter() {
        assert_eq!(
            SynxAwaiter::immediate(SynxStatus::Success).await,
            SynxStatus::Success
        );
    }

    #[test]
    fn pending_awaiter_stays_pending() {
        let slot = WaitSlot::new();
        let mut awaiter = slot.awaiter();

        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        assert!(Pin::new(&mut awaiter).poll(&mut cx).is_pending());
        // Polling twice must not duplicate the registered waker.
        assert!(Pin::new(&mut awaiter).poll(&mut cx).is_pending());
    }
}
