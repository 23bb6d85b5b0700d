// Inbound event flow control
//
// Subscribers that fall behind make the controller ask the VM to hold events;
// once every queue has drained it asks for them to be released. Requests are
// counted rather than sent directly so that a burst of toggles costs at most one
// HoldEvents or ReleaseEvents per wake of the control loop.

use crate::commands::vm_commands;
use crate::error::JdwpResult;
use crate::eventloop::wait_closed;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tracing::{debug, trace};

#[derive(Debug)]
pub struct EventFlowController {
    net: AtomicI32,
    wake: Notify,
    held: AtomicBool,
    high_watermark: usize,
    low_watermark: usize,
}

impl EventFlowController {
    pub(crate) fn new(high_watermark: usize, low_watermark: usize) -> Self {
        Self {
            net: AtomicI32::new(0),
            wake: Notify::new(),
            held: AtomicBool::new(false),
            high_watermark,
            low_watermark,
        }
    }

    /// Ask the VM to stop sending events
    pub fn hold(&self) {
        self.net.fetch_add(1, Ordering::SeqCst);
        self.wake.notify_one();
    }

    /// Let the VM send events again
    pub fn release(&self) {
        self.net.fetch_sub(1, Ordering::SeqCst);
        self.wake.notify_one();
    }

    /// Net hold requests not yet acted upon
    pub fn net_requests(&self) -> i32 {
        self.net.load(Ordering::SeqCst)
    }

    /// Whether the watermark policy currently holds events
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    /// Capture the net count and subtract exactly that amount, keeping any
    /// requests that race in after the load for the next wake
    pub(crate) fn take_net(&self) -> i32 {
        let net = self.net.load(Ordering::SeqCst);
        if net != 0 {
            self.net.fetch_sub(net, Ordering::SeqCst);
        }
        net
    }

    /// Apply the watermark policy to the deepest subscriber queue
    pub(crate) fn on_depth_changed(&self, max_depth: usize) {
        if max_depth > self.high_watermark {
            if self
                .held
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                debug!("Event queue depth {} above high watermark, holding events", max_depth);
                self.hold();
            }
        } else if max_depth < self.low_watermark
            && self
                .held
                .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            debug!("Event queues drained to {}, releasing events", max_depth);
            self.release();
        }
    }

    /// Control loop. `send` issues one VirtualMachine command by number.
    pub(crate) async fn run<F>(self: Arc<Self>, mut closed: watch::Receiver<bool>, mut send: F)
    where
        F: FnMut(u8) -> JdwpResult<()> + Send,
    {
        loop {
            tokio::select! {
                _ = self.wake.notified() => {}
                _ = wait_closed(&mut closed) => break,
            }

            let net = self.take_net();
            let command = match net {
                n if n > 0 => vm_commands::HOLD_EVENTS,
                n if n < 0 => vm_commands::RELEASE_EVENTS,
                _ => continue,
            };

            trace!("Flow control net={}, sending command {}", net, command);
            if let Err(e) = send(command) {
                debug!("Flow control loop stopping: {}", e);
                break;
            }
        }
        debug!("Flow control loop exited");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JdwpError;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[test]
    fn test_take_net_coalesces() {
        let flow = EventFlowController::new(10, 2);
        flow.hold();
        flow.hold();
        flow.hold();
        flow.release();

        assert_eq!(flow.take_net(), 2);
        assert_eq!(flow.take_net(), 0);
    }

    #[test]
    fn test_watermark_hysteresis() {
        let flow = EventFlowController::new(10, 2);

        flow.on_depth_changed(11);
        flow.on_depth_changed(12);
        assert!(flow.is_held());
        assert_eq!(flow.net_requests(), 1);

        // Between the watermarks nothing changes
        flow.on_depth_changed(5);
        assert!(flow.is_held());
        assert_eq!(flow.net_requests(), 1);

        flow.on_depth_changed(1);
        assert!(!flow.is_held());
        assert_eq!(flow.net_requests(), 0);
    }

    #[tokio::test]
    async fn test_loop_sends_one_command_per_wake() {
        let flow = Arc::new(EventFlowController::new(10, 2));
        let sent = Arc::new(Mutex::new(Vec::new()));
        let (closed_tx, closed_rx) = watch::channel(false);

        flow.hold();
        flow.hold();
        flow.hold();
        flow.release();

        let recorder = sent.clone();
        let task = tokio::spawn(flow.clone().run(closed_rx, move |command| {
            recorder.lock().push(command);
            Ok(())
        }));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*sent.lock(), vec![vm_commands::HOLD_EVENTS]);

        flow.release();
        flow.release();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            *sent.lock(),
            vec![vm_commands::HOLD_EVENTS, vm_commands::RELEASE_EVENTS]
        );

        closed_tx.send_replace(true);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_loop_stops_on_send_failure() {
        let flow = Arc::new(EventFlowController::new(10, 2));
        let (_closed_tx, closed_rx) = watch::channel(false);

        flow.hold();
        let task = tokio::spawn(flow.clone().run(closed_rx, |_| Err(JdwpError::Disconnected)));

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
