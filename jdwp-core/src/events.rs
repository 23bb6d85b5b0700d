// JDWP event handling
//
// Events are sent from the JVM to notify about breakpoints, steps, etc.
// The dispatcher only wraps each composite packet into an EventBatch and fans
// it out; decoding happens on the subscriber's side.

use crate::commands::event_kinds;
use crate::error::{JdwpError, JdwpResult};
use crate::flow::EventFlowController;
use crate::protocol::CommandPacket;
use crate::reader::{read_i32, read_id, read_string, read_u64, read_u8};
use crate::types::*;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Composite event packet (can contain multiple events)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSet {
    pub suspend_policy: u8,
    pub events: Vec<Event>,
}

/// Single event within an event set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub kind: u8,
    pub request_id: i32,
    pub details: EventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventKind {
    VMStart {
        thread: ThreadId,
    },
    VMDeath,
    ThreadStart {
        thread: ThreadId,
    },
    ThreadDeath {
        thread: ThreadId,
    },
    ClassPrepare {
        thread: ThreadId,
        ref_type: ReferenceTypeId,
        signature: String,
        status: i32,
    },
    Breakpoint {
        thread: ThreadId,
        location: Location,
    },
    Step {
        thread: ThreadId,
        location: Location,
    },
    Exception {
        thread: ThreadId,
        location: Location,
        exception: ObjectId,
        catch_location: Option<Location>,
    },
    MethodEntry {
        thread: ThreadId,
        location: Location,
    },
    MethodExit {
        thread: ThreadId,
        location: Location,
    },
    Unknown {
        kind: u8,
    },
}

/// One composite event packet, delivered to every subscriber as a unit
#[derive(Debug, Clone)]
pub struct EventBatch {
    id: u32,
    data: Bytes,
}

impl EventBatch {
    pub fn from_packet(packet: CommandPacket) -> JdwpResult<Self> {
        if packet.data.is_empty() {
            return Err(JdwpError::WireFormat(format!(
                "Empty composite event packet id={}",
                packet.id
            )));
        }
        Ok(Self {
            id: packet.id,
            data: Bytes::from(packet.data),
        })
    }

    /// Packet id assigned by the VM
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn suspend_policy(&self) -> u8 {
        self.data[0]
    }

    /// Raw composite payload
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Decode the events using the connection's identifier widths
    pub fn parse(&self, sizes: &IdSizes) -> JdwpResult<EventSet> {
        parse_event_packet(&self.data, sizes)
    }
}

/// Parse an event packet from JDWP
pub fn parse_event_packet(data: &[u8], sizes: &IdSizes) -> JdwpResult<EventSet> {
    let mut buf = data;

    // Read suspend policy
    let suspend_policy = read_u8(&mut buf)?;

    // Read number of events
    let event_count = read_i32(&mut buf)?;
    if event_count < 0 {
        return Err(JdwpError::WireFormat(format!(
            "Negative event count: {}",
            event_count
        )));
    }

    let mut events = Vec::with_capacity((event_count as usize).min(64));

    for _ in 0..event_count {
        let kind = read_u8(&mut buf)?;
        let request_id = read_i32(&mut buf)?;

        let details = match kind {
            event_kinds::BREAKPOINT => {
                let thread = read_id(&mut buf, sizes.object)?;
                let location = read_location(&mut buf, sizes)?;
                EventKind::Breakpoint { thread, location }
            }
            event_kinds::SINGLE_STEP => {
                let thread = read_id(&mut buf, sizes.object)?;
                let location = read_location(&mut buf, sizes)?;
                EventKind::Step { thread, location }
            }
            event_kinds::METHOD_ENTRY => {
                let thread = read_id(&mut buf, sizes.object)?;
                let location = read_location(&mut buf, sizes)?;
                EventKind::MethodEntry { thread, location }
            }
            event_kinds::METHOD_EXIT => {
                let thread = read_id(&mut buf, sizes.object)?;
                let location = read_location(&mut buf, sizes)?;
                EventKind::MethodExit { thread, location }
            }
            event_kinds::EXCEPTION => {
                let thread = read_id(&mut buf, sizes.object)?;
                let location = read_location(&mut buf, sizes)?;
                let _tag = read_u8(&mut buf)?;
                let exception = read_id(&mut buf, sizes.object)?;
                let catch_location = read_location(&mut buf, sizes)?;
                // Uncaught exceptions carry an all-zero catch location
                let catch_location = (catch_location.class_id != 0).then_some(catch_location);
                EventKind::Exception {
                    thread,
                    location,
                    exception,
                    catch_location,
                }
            }
            event_kinds::CLASS_PREPARE => {
                let thread = read_id(&mut buf, sizes.object)?;
                let _ref_type_tag = read_u8(&mut buf)?;
                let ref_type = read_id(&mut buf, sizes.reference_type)?;
                let signature = read_string(&mut buf)?;
                let status = read_i32(&mut buf)?;
                EventKind::ClassPrepare {
                    thread,
                    ref_type,
                    signature,
                    status,
                }
            }
            event_kinds::VM_START => {
                let thread = read_id(&mut buf, sizes.object)?;
                EventKind::VMStart { thread }
            }
            event_kinds::VM_DEATH => EventKind::VMDeath,
            event_kinds::THREAD_START => {
                let thread = read_id(&mut buf, sizes.object)?;
                EventKind::ThreadStart { thread }
            }
            event_kinds::THREAD_DEATH => {
                let thread = read_id(&mut buf, sizes.object)?;
                EventKind::ThreadDeath { thread }
            }
            _ => {
                // Payload length is unknown, so nothing after it can be read
                warn!("Unsupported event kind: {}", kind);
                events.push(Event {
                    kind,
                    request_id,
                    details: EventKind::Unknown { kind },
                });
                break;
            }
        };

        events.push(Event {
            kind,
            request_id,
            details,
        });
    }

    Ok(EventSet {
        suspend_policy,
        events,
    })
}

/// Read a location from the buffer
fn read_location(buf: &mut &[u8], sizes: &IdSizes) -> JdwpResult<Location> {
    let type_tag = read_u8(buf)?;
    let class_id = read_id(buf, sizes.reference_type)?;
    let method_id = read_id(buf, sizes.method)?;
    let index = read_u64(buf)?;

    Ok(Location {
        type_tag,
        class_id,
        method_id,
        index,
    })
}

/// What a subscriber receives
#[derive(Debug, Clone)]
pub enum Delivery {
    Events(EventBatch),
    /// Terminal: the connection is gone and no further batches follow
    Disconnected,
}

struct Subscriber {
    tx: mpsc::UnboundedSender<Delivery>,
    depth: Arc<AtomicUsize>,
}

#[derive(Default)]
struct HubState {
    subscribers: HashMap<u64, Subscriber>,
    next_id: u64,
    closed: bool,
}

/// Per-connection fan-out of event batches to subscriber queues
pub(crate) struct EventHub {
    state: Mutex<HubState>,
    flow: Arc<EventFlowController>,
}

impl EventHub {
    pub(crate) fn new(flow: Arc<EventFlowController>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(HubState::default()),
            flow,
        })
    }

    pub(crate) fn subscribe(self: &Arc<Self>) -> EventSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));

        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;

        if state.closed {
            tx.send(Delivery::Disconnected).ok();
        } else {
            state.subscribers.insert(
                id,
                Subscriber {
                    tx,
                    depth: depth.clone(),
                },
            );
        }
        drop(state);

        debug!("Event subscriber {} registered", id);
        EventSubscription {
            id,
            rx,
            depth,
            hub: Arc::downgrade(self),
        }
    }

    /// Queue `batch` for every subscriber
    pub(crate) fn publish(&self, batch: EventBatch) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        // Subscribers whose receiver is gone are pruned here
        state.subscribers.retain(|id, subscriber| {
            subscriber.depth.fetch_add(1, Ordering::AcqRel);
            let delivered = subscriber.tx.send(Delivery::Events(batch.clone())).is_ok();
            if !delivered {
                debug!("Dropping closed event subscriber {}", id);
            }
            delivered
        });
        self.apply_flow_policy(&state);
    }

    /// Send the terminal delivery and drop every queue
    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        for (_, subscriber) in state.subscribers.drain() {
            subscriber.tx.send(Delivery::Disconnected).ok();
        }
    }

    pub(crate) fn max_depth(&self) -> usize {
        Self::max_depth_locked(&self.state.lock())
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    fn max_depth_locked(state: &HubState) -> usize {
        state
            .subscribers
            .values()
            .map(|s| s.depth.load(Ordering::Acquire))
            .max()
            .unwrap_or(0)
    }

    // Depth and hold state only change together under the hub lock
    fn apply_flow_policy(&self, state: &HubState) {
        self.flow.on_depth_changed(Self::max_depth_locked(state));
    }

    fn notify_dequeue(&self) {
        self.apply_flow_policy(&self.state.lock());
    }

    fn unsubscribe(&self, id: u64) {
        let mut state = self.state.lock();
        if state.subscribers.remove(&id).is_some() {
            debug!("Event subscriber {} unsubscribed", id);
            self.apply_flow_policy(&state);
        }
    }
}

/// A subscriber's FIFO of event batches. Dropping it unsubscribes.
pub struct EventSubscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<Delivery>,
    depth: Arc<AtomicUsize>,
    hub: Weak<EventHub>,
}

impl EventSubscription {
    /// Next delivery. `None` once the terminal delivery has been consumed.
    pub async fn recv(&mut self) -> Option<Delivery> {
        let delivery = self.rx.recv().await;
        self.dequeued(delivery.as_ref());
        delivery
    }

    /// Non-blocking variant of [`EventSubscription::recv`]
    pub fn try_recv(&mut self) -> Option<Delivery> {
        let delivery = self.rx.try_recv().ok();
        self.dequeued(delivery.as_ref());
        delivery
    }

    /// Batches queued and not yet received
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    fn dequeued(&self, delivery: Option<&Delivery>) {
        if let Some(Delivery::Events(_)) = delivery {
            self.depth.fetch_sub(1, Ordering::AcqRel);
            if let Some(hub) = self.hub.upgrade() {
                hub.notify_dequeue();
            }
        }
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(self.id);
        }
    }
}
