// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Asynchronous callback dispatch.
//!
//! Signaling contexts never run client code: they enqueue work items with a
//! non-blocking send and return. A single worker task drains the channel in
//! FIFO order, which also preserves registration order within any one row.
//! The worker is the only context that invokes client callbacks, so a slow
//! or panicking callback costs queue throughput, not the signaling path.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Weak;
use tokio::sync::{mpsc, oneshot};
use tokio_util::task::TaskTracker;
use tracing::{error, trace};

use crate::handle::SynxHandle;
use crate::session::{SynxSession, UserPayload};
use crate::status::SynxStatus;

/// A kernel callback as queued for dispatch. The closure owns whatever
/// context the registering client captured.
pub(crate) type KernelCallback = Box<dyn FnOnce(SynxHandle, SynxStatus) + Send>;

pub(crate) enum DispatchWork {
    Kernel {
        handle: SynxHandle,
        func: KernelCallback,
        status: SynxStatus,
    },
    Payload {
        session: Weak<SynxSession>,
        payload: UserPayload,
    },
    /// Barrier: resolves once every previously enqueued item has executed.
    Flush(oneshot::Sender<()>),
}

pub(crate) struct Dispatcher {
    tx: mpsc::UnboundedSender<DispatchWork>,
    tasks: TaskTracker,
}

impl Dispatcher {
    /// Spawn the dispatch worker. Must be called within a Tokio runtime.
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let tasks = TaskTracker::new();
        tasks.spawn(Self::run(rx));
        tasks.close();
        Self { tx, tasks }
    }

    /// Non-blocking enqueue, safe from any signaling context.
    pub(crate) fn enqueue(&self, work: DispatchWork) {
        if self.tx.send(work).is_err() {
            error!("dispatch worker gone, dropping work item");
        }
    }

    /// Wait until every item enqueued before this call has executed.
    pub(crate) async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(DispatchWork::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    async fn run(mut rx: mpsc::UnboundedReceiver<DispatchWork>) {
        while let Some(work) = rx.recv().await {
            Self::execute(work);
        }
        trace!("dispatch worker exiting");
    }

    fn execute(work: DispatchWork) {
        match work {
            DispatchWork::Kernel {
                handle,
                func,
                status,
            } => {
                trace!(%handle, ?status, "dispatching kernel callback");
                if catch_unwind(AssertUnwindSafe(move || func(handle, status))).is_err() {
                    error!(%handle, "kernel callback panicked");
                }
            }
            DispatchWork::Payload { session, payload } => match session.upgrade() {
                Some(session) => {
                    if !session.deliver(payload) {
                        trace!(
                            session = session.id(),
                            handle = %payload.handle,
                            "dropping payload for closed session"
                        );
                    }
                }
                None => {
                    trace!(handle = %payload.handle, "dropping payload for dead session");
                }
            },
            DispatchWork::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}
