//! WebSocket endpoint for live push notifications

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::StreamExt;
use tracing::{debug, info};

use crate::client::Client;
use crate::hub::SuperHub;

/// Upgrade the connection and subscribe it to `repo`'s hub.
///
/// The caller is expected to have validated the repository name.
pub fn subscribe_upgrade(ws: WebSocketUpgrade, hubs: SuperHub, repo: String) -> Response {
    let max_message_size = hubs.settings().max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, hubs, repo))
}

/// Run one subscriber connection: a send task fed by the hub and a read
/// loop that watches for close frames and silence longer than `pong_wait`.
async fn handle_socket(socket: WebSocket, hubs: SuperHub, repo: String) {
    let (sink, mut stream) = socket.split();
    let pong_wait = hubs.settings().pong_wait;

    let client = Client::new(hubs.subscribe(&repo), hubs.settings());
    let (id, hub) = (client.id(), client.hub().clone());
    let mut send_task = tokio::spawn(client.run(sink));

    info!(repo = %repo, client = id, "subscriber connected");

    loop {
        tokio::select! {
            _ = &mut send_task => break,
            next = tokio::time::timeout(pong_wait, stream.next()) => match next {
                Ok(Some(Ok(Message::Close(_)))) | Ok(None) => break,
                Ok(Some(Ok(_))) => continue,
                Ok(Some(Err(e))) => {
                    debug!(repo = %repo, client = id, "websocket error: {}", e);
                    break;
                }
                Err(_) => {
                    debug!(repo = %repo, client = id, "no traffic within pong wait");
                    break;
                }
            },
        }
    }

    send_task.abort();
    hub.unregister(id);
    info!(repo = %repo, client = id, "subscriber disconnected");
}
