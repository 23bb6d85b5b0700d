// Pending request bookkeeping and completion handles
//
// A PendingRequest exists for every issued command id until its reply is
// delivered or the connection drops. ReplyHandle is the caller's side of it.

use crate::error::{JdwpError, JdwpResult};
use crate::pool::WorkerPool;
use crate::protocol::ReplyPacket;
use std::collections::HashMap;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

tokio::task_local! {
    // Identity of the connection whose dispatcher is running on this task
    static DISPATCHER: usize;
}

/// Run `future` as the dispatcher of connection `context`
pub(crate) async fn run_as_dispatcher<F: Future>(context: usize, future: F) -> F::Output {
    DISPATCHER.scope(context, future).await
}

/// True when called from the dispatcher of connection `context`
pub(crate) fn on_dispatcher(context: usize) -> bool {
    DISPATCHER.try_with(|current| *current == context).unwrap_or(false)
}

fn dispatcher_wait_error(id: u32) -> JdwpError {
    JdwpError::Programmer(format!(
        "Waiting for reply id={} on the dispatcher task would deadlock",
        id
    ))
}

pub(crate) struct PendingRequest {
    reply_tx: oneshot::Sender<JdwpResult<ReplyPacket>>,
    issued_at: Instant,
    latency_waiters: Vec<oneshot::Sender<Duration>>,
}

impl PendingRequest {
    pub(crate) fn new(
        reply_tx: oneshot::Sender<JdwpResult<ReplyPacket>>,
        latency_waiters: Vec<oneshot::Sender<Duration>>,
    ) -> Self {
        Self {
            reply_tx,
            issued_at: Instant::now(),
            latency_waiters,
        }
    }

    /// Deliver the reply. A dropped handle is not an error.
    pub(crate) fn complete(self, reply: ReplyPacket) {
        let elapsed = self.issued_at.elapsed();
        for waiter in self.latency_waiters {
            waiter.send(elapsed).ok();
        }
        self.reply_tx.send(Ok(reply)).ok();
    }

    pub(crate) fn fail(self, error: JdwpError) {
        self.reply_tx.send(Err(error)).ok();
    }
}

/// Outstanding requests keyed by packet id
#[derive(Default)]
pub(crate) struct PendingTable {
    entries: HashMap<u32, PendingRequest>,
}

impl PendingTable {
    pub(crate) fn register(&mut self, id: u32, request: PendingRequest) {
        let previous = self.entries.insert(id, request);
        debug_assert!(previous.is_none(), "duplicate pending id {}", id);
    }

    pub(crate) fn take(&mut self, id: u32) -> Option<PendingRequest> {
        self.entries.remove(&id)
    }

    pub(crate) fn drain(&mut self) -> Vec<(u32, PendingRequest)> {
        self.entries.drain().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Completion handle for one issued command.
///
/// Await it, block on it with [`ReplyHandle::wait`], or attach a continuation
/// with [`ReplyHandle::then`]. Resolves to the reply payload, or to the
/// translated fault for a non-zero error code.
#[derive(Debug)]
pub struct ReplyHandle {
    id: u32,
    reply_rx: oneshot::Receiver<JdwpResult<ReplyPacket>>,
    context: usize,
    pool: WorkerPool,
}

impl ReplyHandle {
    pub(crate) fn new(
        id: u32,
        reply_rx: oneshot::Receiver<JdwpResult<ReplyPacket>>,
        context: usize,
        pool: WorkerPool,
    ) -> Self {
        Self {
            id,
            reply_rx,
            context,
            pool,
        }
    }

    /// Packet id of the request
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Block the current thread until the reply arrives.
    ///
    /// Only for threads outside the async runtime: plain threads,
    /// `spawn_blocking` and continuations. On an async task it fails fast with
    /// a programmer error; use `.await` there instead.
    pub fn wait(self) -> JdwpResult<Vec<u8>> {
        if on_dispatcher(self.context) {
            return Err(dispatcher_wait_error(self.id));
        }

        let id = self.id;
        let mut reply_rx = self.reply_rx;
        if Handle::try_current().is_err() {
            return settle(reply_rx.blocking_recv());
        }

        // Runtime threads that may not block are rejected by tokio before
        // the receiver is touched
        match panic::catch_unwind(AssertUnwindSafe(|| reply_rx.blocking_recv())) {
            Ok(received) => settle(received),
            Err(_) => Err(JdwpError::Programmer(format!(
                "Blocking wait for reply id={} on an async task; use .await",
                id
            ))),
        }
    }

    /// Run `f` with the outcome on the connection's worker pool
    pub fn then<F, T>(self, f: F) -> JoinHandle<JdwpResult<T>>
    where
        F: FnOnce(JdwpResult<Vec<u8>>) -> T + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::spawn(async move {
            let outcome = self.await;
            pool.run(move || f(outcome)).await
        })
    }
}

fn settle(
    received: Result<JdwpResult<ReplyPacket>, oneshot::error::RecvError>,
) -> JdwpResult<Vec<u8>> {
    match received {
        Ok(Ok(reply)) => reply.into_result(),
        Ok(Err(e)) => Err(e),
        // Sender dropped without an answer: the connection went away
        Err(_) => Err(JdwpError::Disconnected),
    }
}

impl Future for ReplyHandle {
    type Output = JdwpResult<Vec<u8>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if on_dispatcher(self.context) {
            return Poll::Ready(Err(dispatcher_wait_error(self.id)));
        }
        Pin::new(&mut self.reply_rx).poll(cx).map(settle)
    }
}
