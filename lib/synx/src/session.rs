// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-client session state: a bounded event queue of delivered payloads
//! plus the wait primitive behind `poll`.
//!
//! The dispatch worker delivers into a session only after checking its
//! liveness flag under the session lock, so a close can never race a
//! delivery into freed state.

use parking_lot::Mutex as ParkingMutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::warn;

use crate::error::{Result, SynxError};
use crate::handle::SynxHandle;
use crate::status::SynxStatus;

/// Size of the opaque payload carried by a user callback, in u64 words.
pub const SYNX_PAYLOAD_WORDS: usize = 4;

/// Maximum number of undelivered payloads a session queue holds. Past this
/// bound the oldest entry is evicted and the overflow flag is raised.
pub const SYNX_EVENT_QUEUE_DEPTH: usize = 128;

/// One payload delivered into a session's event queue.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct UserPayload {
    /// The object the registration was made on.
    pub handle: SynxHandle,
    /// Terminal status of that object.
    pub status: SynxStatus,
    /// Opaque payload supplied at registration, not interpreted here.
    pub data: [u64; SYNX_PAYLOAD_WORDS],
}

/// Result of draining a session queue via `poll`.
#[derive(Debug, Default)]
pub struct PollOutcome {
    /// Payloads delivered since the previous drain, oldest first.
    pub payloads: Vec<UserPayload>,
    /// True when the queue bound evicted at least one payload since the
    /// previous drain.
    pub overflow: bool,
}

pub struct SynxSession {
    id: u64,
    state: ParkingMutex<SessionState>,
    notify: Notify,
}

struct SessionState {
    queue: VecDeque<UserPayload>,
    overflowed: bool,
    closed: bool,
}

impl SynxSession {
    pub(crate) fn new(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id,
            state: ParkingMutex::new(SessionState {
                queue: VecDeque::new(),
                overflowed: false,
                closed: false,
            }),
            notify: Notify::new(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Push one payload into the queue and wake pollers. Returns false if
    /// the session is closed and the payload was dropped.
    pub(crate) fn deliver(&self, payload: UserPayload) -> bool {
        {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            if state.queue.len() == SYNX_EVENT_QUEUE_DEPTH {
                state.queue.pop_front();
                state.overflowed = true;
                warn!(session = self.id, "event queue full, evicting oldest payload");
            }
            state.queue.push_back(payload);
        }
        self.notify.notify_waiters();
        true
    }

    /// Suspend until at least one payload is queued or `timeout` elapses,
    /// then drain and return everything queued. A timeout with an empty
    /// queue returns an empty outcome, not an error.
    pub(crate) async fn poll(&self, timeout: Duration) -> Result<PollOutcome> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(SynxError::SessionClosed);
                }
                if !state.queue.is_empty() {
                    return Ok(PollOutcome {
                        payloads: state.queue.drain(..).collect(),
                        overflow: std::mem::take(&mut state.overflowed),
                    });
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(PollOutcome::default());
            }
        }
    }

    /// Mark the session dead, drop queued payloads, and wake pollers.
    pub(crate) fn close(&self) {
        {
            let mut state = self.state.lock();
            state.closed = true;
            state.queue.clear();
        }
        self.notify.notify_waiters();
    }
}
