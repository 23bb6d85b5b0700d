// JDWP connection management
//
// A JdwpConnection is a cheap handle on per-connection shared state. Starting
// one spawns the dispatcher, the writer and the event flow control loop.
// Pending requests, the suspend scope and the object table share one lock;
// the dispose batch has its own.

use crate::cache::{Lookup, ScopeState, SuspendScope};
use crate::commands::{command_sets, resumes_debuggee, suspend_policy, vm_commands};
use crate::config::ConnectionConfig;
use crate::error::{JdwpError, JdwpResult};
use crate::eventloop::{dispatcher_task, writer_task, Outbound};
use crate::events::{EventBatch, EventHub, EventSubscription};
use crate::flow::EventFlowController;
use crate::objects::{DisposeBatch, ObjectTable, Reclaim, RemoteHandle};
use crate::pending::{PendingRequest, PendingTable, ReplyHandle};
use crate::pool::WorkerPool;
use crate::protocol::{CommandPacket, ReplyPacket};
use crate::transport::{connect_tcp, FrameRead, FrameWrite};
use crate::types::{IdSizes, ObjectId};
use crate::vm::encode_dispose_objects;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

pub(crate) struct CoreState {
    pending: PendingTable,
    scope: SuspendScope,
    objects: ObjectTable,
    id_sizes: IdSizes,
    next_id: u32,
    dead: bool,
    shutting_down: bool,
    latency_waiters: Vec<oneshot::Sender<Duration>>,
}

pub(crate) struct Shared {
    state: Mutex<CoreState>,
    disposals: Mutex<DisposeBatch>,
    events: Arc<EventHub>,
    flow: Arc<EventFlowController>,
    outbound: mpsc::UnboundedSender<Outbound>,
    closed: watch::Sender<bool>,
    pool: WorkerPool,
    sent_packets: AtomicU64,
}

impl Shared {
    /// Identifies this connection's dispatcher task
    pub(crate) fn context(&self) -> usize {
        self as *const Shared as usize
    }

    pub(crate) fn closed_receiver(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    fn issue(&self, command_set: u8, command: u8, data: Vec<u8>) -> JdwpResult<ReplyHandle> {
        let (reply_tx, reply_rx) = oneshot::channel();

        let mut state = self.state.lock();
        if state.dead {
            return Err(JdwpError::Disconnected);
        }

        let id = state.next_id;
        state.next_id = state.next_id.wrapping_add(1).max(1);

        // Registered before the frame can reach the wire
        let waiters = std::mem::take(&mut state.latency_waiters);
        state.pending.register(id, PendingRequest::new(reply_tx, waiters));

        let evicted = if resumes_debuggee(command_set, command) {
            Some(state.scope.resume_issued(id))
        } else {
            None
        };

        debug!("Sending command id={} set={} cmd={}", id, command_set, command);
        let bytes = CommandPacket::with_data(id, command_set, command, data).encode();

        // Queued under the lock so wire order follows id order
        let queued = self.outbound.send(Outbound::Frame { id, bytes });
        if queued.is_err() {
            state.pending.take(id);
            state.scope.command_complete(id);
        }
        drop(state);
        drop(evicted);

        queued.map_err(|_| JdwpError::Disconnected)?;
        self.sent_packets.fetch_add(1, Ordering::Relaxed);

        Ok(ReplyHandle::new(id, reply_rx, self.context(), self.pool.clone()))
    }

    pub(crate) fn complete_reply(&self, reply: ReplyPacket) {
        let id = reply.id;
        let pending = {
            let mut state = self.state.lock();
            state.scope.command_complete(id);
            state.pending.take(id)
        };

        match pending {
            Some(request) => {
                debug!("Received reply id={} error={}", id, reply.error_code);
                request.complete(reply);
            }
            None => warn!("Received reply for unknown command id={}", id),
        }

        self.flush_disposals();
    }

    pub(crate) fn deliver_events(&self, batch: EventBatch) {
        if batch.suspend_policy() == suspend_policy::ALL {
            self.state.lock().scope.notify_suspend();
        }
        self.events.publish(batch);
    }

    pub(crate) fn fail_request(&self, id: u32, error: JdwpError) {
        let pending = {
            let mut state = self.state.lock();
            state.scope.command_complete(id);
            state.pending.take(id)
        };
        if let Some(request) = pending {
            request.fail(error);
        }
    }

    /// Send every reclaimed id as one DisposeObjects command
    fn flush_disposals(&self) {
        let batch = {
            let mut disposals = self.disposals.lock();
            if disposals.is_empty() {
                return;
            }
            disposals.take()
        };

        let object_size = {
            let state = self.state.lock();
            if state.shutting_down || state.dead {
                return;
            }
            state.id_sizes.object
        };

        debug!("Disposing {} remote object(s)", batch.len());
        let payload = encode_dispose_objects(&batch, object_size);
        // Fire and forget: the reply is only bookkeeping
        if let Err(e) = self.issue(
            command_sets::VIRTUAL_MACHINE,
            vm_commands::DISPOSE_OBJECTS,
            payload,
        ) {
            debug!("Dropping dispose batch: {}", e);
        }
    }

    /// Tear down after transport loss or a local close. Idempotent.
    pub(crate) fn disconnect(&self) {
        let (drained, evicted) = {
            let mut state = self.state.lock();
            if state.dead {
                return;
            }
            state.dead = true;
            state.objects.clear();
            state.latency_waiters.clear();
            (state.pending.drain(), state.scope.shutdown())
        };
        drop(evicted);

        info!(
            "Connection lost, failing {} pending request(s)",
            drained.len()
        );
        for (_, request) in drained {
            request.fail(JdwpError::Disconnected);
        }

        self.disposals.lock().clear();
        self.events.close();
        self.closed.send_replace(true);
        self.outbound.send(Outbound::Close).ok();
    }

    pub(crate) fn close(&self) {
        {
            let mut state = self.state.lock();
            if state.dead {
                return;
            }
            state.shutting_down = true;
        }
        info!("Closing JDWP connection");
        self.disconnect();
    }
}

impl Reclaim for Shared {
    fn reclaim(&self, id: ObjectId, retained: u32) {
        {
            let mut state = self.state.lock();
            state.objects.forget_if_dead(id);
            if state.dead || state.shutting_down {
                return;
            }
        }

        let ready = self.disposals.lock().push(id, retained);
        if ready {
            self.flush_disposals();
        }
    }
}

// Closes the connection once the last JdwpConnection clone goes away.
// The engine tasks keep their own Arc<Shared>, so Shared alone never drops.
struct Owner {
    shared: Arc<Shared>,
}

impl Drop for Owner {
    fn drop(&mut self) {
        debug!("Last connection handle dropped");
        self.shared.close();
    }
}

/// Handle on one debuggee connection. Clones share the connection, which
/// is closed when the last clone is dropped.
#[derive(Clone)]
pub struct JdwpConnection {
    shared: Arc<Shared>,
    _owner: Arc<Owner>,
}

impl JdwpConnection {
    /// Connect to a JVM via JDWP
    pub async fn connect(host: &str, port: u16) -> JdwpResult<Self> {
        Self::connect_with_config(host, port, ConnectionConfig::default()).await
    }

    pub async fn connect_with_config(
        host: &str,
        port: u16,
        config: ConnectionConfig,
    ) -> JdwpResult<Self> {
        config.validate()?;
        let (reader, writer) = connect_tcp(host, port, config.max_packet_size).await?;
        Self::start(reader, writer, config)
    }

    /// Start the engine over an established transport.
    /// Must be called from within a tokio runtime.
    pub fn start<R, W>(reader: R, writer: W, config: ConnectionConfig) -> JdwpResult<Self>
    where
        R: FrameRead,
        W: FrameWrite,
    {
        config.validate()?;

        let flow = Arc::new(EventFlowController::new(
            config.event_queue_high_watermark,
            config.event_queue_low_watermark,
        ));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);

        let shared = Arc::new(Shared {
            state: Mutex::new(CoreState {
                pending: PendingTable::default(),
                scope: SuspendScope::default(),
                objects: ObjectTable::default(),
                id_sizes: config.id_sizes,
                next_id: 1,
                dead: false,
                shutting_down: false,
                latency_waiters: Vec::new(),
            }),
            disposals: Mutex::new(DisposeBatch::new(config.dispose_threshold)),
            events: EventHub::new(flow.clone()),
            flow: flow.clone(),
            outbound: outbound_tx,
            closed: closed_tx,
            pool: WorkerPool::new(config.worker_threads),
            sent_packets: AtomicU64::new(0),
        });

        tokio::spawn(writer_task(shared.clone(), writer, outbound_rx));
        tokio::spawn(dispatcher_task(shared.clone(), reader));

        let weak = Arc::downgrade(&shared);
        tokio::spawn(flow.run(closed_rx, move |command| {
            let shared = weak.upgrade().ok_or(JdwpError::Disconnected)?;
            shared
                .issue(command_sets::VIRTUAL_MACHINE, command, Vec::new())
                .map(drop)
        }));

        info!("JDWP connection started");
        let owner = Arc::new(Owner {
            shared: shared.clone(),
        });
        Ok(Self {
            shared,
            _owner: owner,
        })
    }

    /// Send a command without waiting. The reply arrives through the handle.
    pub fn issue(&self, command_set: u8, command: u8, data: Vec<u8>) -> JdwpResult<ReplyHandle> {
        self.shared.issue(command_set, command, data)
    }

    /// Send a command and wait for reply
    pub async fn send_command(
        &self,
        command_set: u8,
        command: u8,
        data: Vec<u8>,
    ) -> JdwpResult<Vec<u8>> {
        self.issue(command_set, command, data)?.await
    }

    /// Send a command and block the calling thread until the reply arrives.
    ///
    /// Called from an async task or the dispatcher this returns
    /// [`JdwpError::Programmer`] once the command is on the wire; use
    /// [`send_command`](Self::send_command) there.
    pub fn send_command_blocking(
        &self,
        command_set: u8,
        command: u8,
        data: Vec<u8>,
    ) -> JdwpResult<Vec<u8>> {
        self.issue(command_set, command, data)?.wait()
    }

    /// New FIFO of composite event batches
    pub fn subscribe_events(&self) -> EventSubscription {
        self.shared.events.subscribe()
    }

    pub fn event_flow(&self) -> Arc<EventFlowController> {
        self.shared.flow.clone()
    }

    /// Cached value for `key` while the VM stays suspended, otherwise computed.
    ///
    /// A value computed across a suspend/resume transition is returned but
    /// not stored.
    pub async fn cache_get_or_compute<T, F, Fut>(&self, key: &str, supplier: F) -> JdwpResult<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = JdwpResult<T>>,
    {
        let lookup = self.shared.state.lock().scope.lookup::<T>(key);
        let ticket = match lookup {
            Lookup::Hit(value) => return Ok(value),
            Lookup::Miss(ticket) => ticket,
        };

        let value = supplier().await?;

        let evicted = self
            .shared
            .state
            .lock()
            .scope
            .store(key, ticket, Arc::new(value.clone()));
        drop(evicted);

        Ok(value)
    }

    /// Record that the VM is suspended as a whole
    pub fn notify_suspend(&self) -> bool {
        self.shared.state.lock().scope.notify_suspend()
    }

    pub fn invalidate_cache(&self) {
        let evicted = self.shared.state.lock().scope.invalidate();
        drop(evicted);
    }

    pub fn is_suspended(&self) -> bool {
        self.shared.state.lock().scope.state() == ScopeState::Active
    }

    pub fn suspend_epoch(&self) -> u64 {
        self.shared.state.lock().scope.epoch()
    }

    /// Local lease on a remote object id received from the VM.
    /// `None` for the null object.
    pub fn acquire_remote_handle(&self, id: ObjectId) -> Option<RemoteHandle> {
        let owner: Weak<dyn Reclaim> = Arc::downgrade(&self.shared) as Weak<dyn Reclaim>;
        self.shared.state.lock().objects.acquire(id, &owner)
    }

    /// Send queued disposals now instead of waiting for the batch to fill
    pub fn flush_disposals(&self) {
        self.shared.flush_disposals();
    }

    pub fn pending_disposals(&self) -> usize {
        self.shared.disposals.lock().len()
    }

    pub fn tracked_objects(&self) -> usize {
        self.shared.state.lock().objects.len()
    }

    pub fn id_sizes(&self) -> IdSizes {
        self.shared.state.lock().id_sizes
    }

    pub fn set_id_sizes(&self, sizes: IdSizes) {
        self.shared.state.lock().id_sizes = sizes;
    }

    /// No requests outstanding and no undelivered events
    pub fn is_idle(&self) -> bool {
        self.shared.state.lock().pending.is_empty() && self.shared.events.max_depth() == 0
    }

    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    /// Commands written since the connection started
    pub fn sent_packets(&self) -> u64 {
        self.shared.sent_packets.load(Ordering::Relaxed)
    }

    /// Round trip time of the next command issued on this connection
    pub fn measure_latency(&self) -> impl Future<Output = JdwpResult<Duration>> + Send {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.shared.state.lock();
            if !state.dead {
                state.latency_waiters.push(tx);
            }
        }
        async move { rx.await.map_err(|_| JdwpError::Disconnected) }
    }

    pub fn is_connected(&self) -> bool {
        !self.shared.state.lock().dead
    }

    /// Close the transport. Outstanding requests fail with `Disconnected`.
    pub fn close(&self) {
        self.shared.close();
    }
}

impl fmt::Debug for JdwpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("JdwpConnection")
            .field("connected", &!state.dead)
            .field("pending", &state.pending.len())
            .field("suspend_epoch", &state.scope.epoch())
            .field("pending_resumes", &state.scope.pending_resumes())
            .field("cached", &state.scope.len())
            .field("objects", &state.objects.len())
            .field("subscribers", &self.shared.events.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{StreamReader, StreamWriter};
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    fn start_over_duplex() -> (JdwpConnection, tokio::io::DuplexStream) {
        let (client, vm) = duplex(4096);
        let (read_half, write_half) = tokio::io::split(client);
        let connection = JdwpConnection::start(
            StreamReader::new(read_half, 4096),
            StreamWriter::new(write_half),
            ConnectionConfig::default(),
        )
        .unwrap();
        (connection, vm)
    }

    async fn read_command(vm: &mut tokio::io::DuplexStream) -> CommandPacket {
        let mut header = [0u8; 11];
        vm.read_exact(&mut header).await.unwrap();
        let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let mut data = vec![0u8; length - 11];
        vm.read_exact(&mut data).await.unwrap();
        CommandPacket::with_data(
            u32::from_be_bytes([header[4], header[5], header[6], header[7]]),
            header[9],
            header[10],
            data,
        )
    }

    #[tokio::test]
    async fn test_ids_are_monotonic() {
        let (connection, mut vm) = start_over_duplex();

        let first = connection.issue(1, 1, Vec::new()).unwrap();
        let second = connection.issue(1, 7, Vec::new()).unwrap();
        assert!(second.id() > first.id());

        assert_eq!(read_command(&mut vm).await.id, first.id());
        assert_eq!(read_command(&mut vm).await.id, second.id());
        assert_eq!(connection.pending_count(), 2);
        assert_eq!(connection.sent_packets(), 2);
    }

    #[tokio::test]
    async fn test_reply_over_stream_transport() {
        let (connection, mut vm) = start_over_duplex();

        let handle = connection.issue(1, 1, Vec::new()).unwrap();
        let command = read_command(&mut vm).await;
        vm.write_all(&ReplyPacket::new(command.id, 0, vec![5]).encode())
            .await
            .unwrap();

        assert_eq!(handle.await.unwrap(), vec![5]);
        assert!(connection.is_idle());
    }

    #[tokio::test]
    async fn test_close_fails_pending_and_rejects_new_commands() {
        let (connection, _vm) = start_over_duplex();

        let handle = connection.issue(1, 1, Vec::new()).unwrap();
        connection.close();

        assert!(matches!(handle.await, Err(JdwpError::Disconnected)));
        assert!(!connection.is_connected());
        assert!(matches!(
            connection.issue(1, 1, Vec::new()),
            Err(JdwpError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_resume_issue_invalidates_scope() {
        let (connection, _vm) = start_over_duplex();

        assert!(connection.notify_suspend());
        assert!(connection.is_suspended());

        let _resume = connection
            .issue(command_sets::VIRTUAL_MACHINE, vm_commands::RESUME, Vec::new())
            .unwrap();
        assert!(!connection.is_suspended());
        // Still in flight, so a suspend report is not trusted yet
        assert!(!connection.notify_suspend());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let (client, _vm) = duplex(64);
        let (read_half, write_half) = tokio::io::split(client);
        let config = ConnectionConfig {
            worker_threads: 0,
            ..Default::default()
        };

        assert!(matches!(
            JdwpConnection::start(
                StreamReader::new(read_half, 64),
                StreamWriter::new(write_half),
                config
            ),
            Err(JdwpError::InvalidConfig(_))
        ));
    }
}
