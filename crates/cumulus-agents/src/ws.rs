//! WebSocket transport: pumps JSON-RPC frames between an axum socket and
//! an [`RpcChannel`].

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::channel::RpcChannel;

const INBOUND_BUFFER: usize = 64;

/// Wrap an upgraded socket into an RPC channel.
///
/// The channel terminates when the peer closes the socket or a read fails.
/// Closing the channel closes the socket.
pub fn attach(socket: WebSocket, agent_id: &str, timeout: Duration) -> Arc<RpcChannel> {
    let (mut sink, mut stream) = socket.split();
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
    let (channel, mut outbound) = RpcChannel::new(inbound_rx, timeout);

    let reader_id = agent_id.to_string();
    tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if inbound_tx.send(text.as_str().to_owned()).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(agent_id = %reader_id, error = %e, "agent socket read failed");
                    break;
                }
            }
        }
        debug!(agent_id = %reader_id, "agent socket reader finished");
    });

    let writer_id = agent_id.to_string();
    tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if let Err(e) = sink.send(Message::Text(frame.into())).await {
                warn!(agent_id = %writer_id, error = %e, "agent socket write failed");
                break;
            }
        }
        let _ = sink.close().await;
        debug!(agent_id = %writer_id, "agent socket writer finished");
    });

    channel
}
