// JDWP Event Loop
//
// Two tasks per connection. The dispatcher is the only reader of the
// transport: it routes replies to their pending requests and composite events
// to subscribers. The writer drains the outbound queue in id order.

use crate::commands::command_sets;
use crate::connection::Shared;
use crate::error::JdwpError;
use crate::events::EventBatch;
use crate::pending::run_as_dispatcher;
use crate::protocol::{hex_dump, Packet};
use crate::transport::{FrameRead, FrameWrite};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn, Level};

/// Work for the writer task
pub(crate) enum Outbound {
    Frame { id: u32, bytes: Vec<u8> },
    /// Close the transport and stop
    Close,
}

/// Resolve once the connection has been marked closed
pub(crate) async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    loop {
        if *closed.borrow_and_update() {
            return;
        }
        if closed.changed().await.is_err() {
            return;
        }
    }
}

fn trace_frame(direction: &str, frame: &[u8]) {
    if tracing::enabled!(Level::TRACE) {
        for line in hex_dump(frame) {
            trace!("{} {}", direction, line);
        }
    }
}

/// Dispatcher task: sole reader of the transport
pub(crate) async fn dispatcher_task<R: FrameRead>(shared: Arc<Shared>, mut reader: R) {
    let mut closed = shared.closed_receiver();
    let context = shared.context();

    run_as_dispatcher(context, async {
        info!("Dispatcher started");

        loop {
            let frame = tokio::select! {
                frame = reader.read_frame() => frame,
                _ = wait_closed(&mut closed) => {
                    debug!("Dispatcher stopping, connection closed locally");
                    break;
                }
            };

            match frame {
                Ok(Some(frame)) => dispatch_frame(&shared, &frame),
                Ok(None) => {
                    info!("Debuggee closed the connection");
                    break;
                }
                Err(e) => {
                    error!("Failed to read packet: {}", e);
                    break;
                }
            }
        }
    })
    .await;

    shared.disconnect();
    info!("Dispatcher shutting down");
}

/// Route one inbound frame. Never waits on anything.
pub(crate) fn dispatch_frame(shared: &Shared, frame: &[u8]) {
    trace_frame("<<", frame);

    match Packet::decode(frame) {
        Ok(Packet::Reply(reply)) => shared.complete_reply(reply),
        Ok(Packet::Command(command)) if command.command_set == command_sets::EVENT => {
            debug!("Received event packet id={}, len={}", command.id, command.data.len());
            match EventBatch::from_packet(command) {
                Ok(batch) => shared.deliver_events(batch),
                Err(e) => warn!("Failed to accept event packet: {}", e),
            }
        }
        Ok(Packet::Command(command)) => {
            warn!(
                "Ignoring command id={} set={} cmd={} from debuggee",
                command.id, command.command_set, command.command
            );
        }
        Err(e) => warn!("Failed to decode packet: {}", e),
    }
}

/// Writer task: sole writer of the transport
pub(crate) async fn writer_task<W: FrameWrite>(
    shared: Arc<Shared>,
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(message) = outbound.recv().await {
        match message {
            Outbound::Frame { id, bytes } => {
                trace_frame(">>", &bytes);
                if let Err(e) = writer.write_frame(&bytes).await {
                    error!("Failed to write command id={}: {}", id, e);
                    shared.fail_request(id, e);
                    shared.disconnect();
                    break;
                }
            }
            Outbound::Close => {
                if let Err(e) = writer.close().await {
                    debug!("Error closing transport: {}", e);
                }
                break;
            }
        }
    }

    // Frames queued behind a close are never written
    outbound.close();
    while let Some(message) = outbound.recv().await {
        if let Outbound::Frame { id, .. } = message {
            shared.fail_request(id, JdwpError::Disconnected);
        }
    }
    debug!("Writer task exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_closed_sees_earlier_close() {
        let (tx, mut rx) = watch::channel(false);
        tx.send_replace(true);
        wait_closed(&mut rx).await;
    }

    #[tokio::test]
    async fn test_wait_closed_returns_when_sender_dropped() {
        let (tx, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move { wait_closed(&mut rx).await });
        drop(tx);
        waiter.await.unwrap();
    }
}
