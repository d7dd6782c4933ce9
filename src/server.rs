use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde::Serialize;
use warp::ws::{Message, WebSocket};
use warp::{Filter, Rejection, Reply};

use crate::connection::Connection;
use crate::messages::DecodeError;
use crate::registry::Registry;
use crate::session::{RelayError, Session};

#[derive(Serialize, Debug)]
pub struct Status {
    message: &'static str,
    connections: usize,
    rooms: usize,
}

#[derive(Clone)]
pub struct Server {
    registry: Registry,
    outbound_buffer: usize,
}

impl Server {
    pub fn new(outbound_buffer: usize) -> Self {
        Server {
            registry: Registry::new(),
            outbound_buffer,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub async fn status(&self) -> Status {
        Status {
            message: "Room relay running",
            connections: self.registry.len().await,
            rooms: self.registry.room_count().await,
        }
    }

    /// Drives one upgraded socket until it closes.
    pub async fn handle_connection(&self, ws: WebSocket) {
        let (connection, mut rx) = Connection::channel(self.outbound_buffer);
        let id = connection.id();
        info!("connection {id} accepted");

        let (mut ws_tx, mut ws_rx) = ws.split();
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = ws_tx.send(Message::text(frame)).await {
                    debug!("failed to write to {id}: {e}");
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        let mut session = Session::new(connection, self.registry.clone());
        while let Some(result) = ws_rx.next().await {
            let msg = match result {
                Ok(msg) => msg,
                Err(e) => {
                    debug!("read error on {id}: {e}");
                    break;
                }
            };
            if msg.is_close() {
                break;
            }
            if msg.is_ping() || msg.is_pong() {
                continue;
            }
            let handled = match msg.to_str() {
                Ok(text) => session.handle_frame(text).await,
                Err(()) => Err(RelayError::Decode(DecodeError::NotText)),
            };
            if let Err(e) = handled {
                warn!("closing connection {id}: {e}");
                break;
            }
        }

        session.close().await;
        info!("connection {id} closed");
    }
}

/// `GET /ws` for the relay socket and `GET /status` for registry counts.
pub fn routes(server: Server) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let status_server = server.clone();

    let ws_route = warp::path("ws")
        .and(warp::path::end())
        .and(warp::ws())
        .map(move |ws: warp::ws::Ws| {
            let server = server.clone();
            ws.on_upgrade(move |socket| async move {
                server.handle_connection(socket).await;
            })
        });

    let status_route = warp::path("status")
        .and(warp::path::end())
        .and(warp::get())
        .and_then(move || {
            let server = status_server.clone();
            async move { Ok::<_, Rejection>(warp::reply::json(&server.status().await)) }
        });

    ws_route.or(status_route)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    fn spawn_relay() -> (SocketAddr, Server) {
        let server = Server::new(32);
        let (addr, running) = warp::serve(routes(server.clone())).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(running);
        (addr, server)
    }

    async fn connect(addr: SocketAddr) -> Client {
        let (ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        ws
    }

    async fn send(client: &mut Client, value: Value) {
        client.send(WsMessage::text(value.to_string())).await.unwrap();
    }

    async fn next_event(client: &mut Client) -> Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
                .await
                .expect("timed out waiting for an event")
                .expect("stream ended")
                .unwrap();
            if let WsMessage::Text(text) = msg {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    async fn assert_no_event(client: &mut Client) {
        let quiet = tokio::time::timeout(Duration::from_millis(200), async {
            loop {
                match client.next().await {
                    Some(Ok(WsMessage::Text(text))) => return text,
                    Some(Ok(_)) => {}
                    Some(Err(_)) | None => std::future::pending::<()>().await,
                }
            }
        })
        .await;
        assert!(quiet.is_err(), "unexpected event: {quiet:?}");
    }

    async fn join(addr: SocketAddr, username: &str, room: &str) -> Client {
        let mut client = connect(addr).await;
        send(&mut client, json!({"username": username, "room": room})).await;
        assert_eq!(
            next_event(&mut client).await,
            json!({"type": "system", "message": format!("{username} joined {room} 👋")})
        );
        client
    }

    #[tokio::test]
    async fn chat_switch_and_disconnect_over_websocket() {
        let (addr, server) = spawn_relay();
        let mut alice = join(addr, "Alice", "lobby").await;
        let mut bob = join(addr, "Bob", "lobby").await;
        assert_eq!(
            next_event(&mut alice).await["message"],
            "Bob joined lobby 👋"
        );

        send(&mut alice, json!({"type": "chat", "message": "hi"})).await;
        for client in [&mut alice, &mut bob] {
            let event = next_event(client).await;
            assert_eq!(event["type"], "chat");
            assert_eq!(event["username"], "Alice");
            assert_eq!(event["message"], "hi");
        }

        send(&mut alice, json!({"type": "switch_room", "room": "den"})).await;
        assert_eq!(
            next_event(&mut bob).await,
            json!({"type": "system", "message": "Alice left the room ❌"})
        );
        assert_eq!(
            next_event(&mut alice).await,
            json!({"type": "system", "message": "Alice joined the room 👋"})
        );

        // Bob's next frame is his own chat, so Alice's den chat never reached him.
        send(&mut alice, json!({"type": "chat", "message": "in den"})).await;
        assert_eq!(next_event(&mut alice).await["message"], "in den");
        send(&mut bob, json!({"type": "chat", "message": "still lobby"})).await;
        assert_eq!(next_event(&mut bob).await["message"], "still lobby");

        send(&mut bob, json!({"type": "switch_room", "room": "den"})).await;
        assert_eq!(
            next_event(&mut alice).await["message"],
            "Bob joined the room 👋"
        );
        next_event(&mut bob).await;

        drop(bob);
        assert_eq!(
            next_event(&mut alice).await,
            json!({"type": "system", "message": "Bob left the room ❌"})
        );
        assert_no_event(&mut alice).await;
        assert_eq!(server.registry().len().await, 1);
        assert_eq!(server.registry().members("den").await, vec!["Alice"]);
    }

    #[tokio::test]
    async fn ping_is_ignored_and_binary_frame_disconnects() {
        let (addr, server) = spawn_relay();
        let mut alice = join(addr, "Alice", "r").await;
        let mut bob = join(addr, "Bob", "r").await;
        next_event(&mut alice).await;

        bob.send(WsMessage::Ping(vec![7].into())).await.unwrap();
        send(&mut bob, json!({"type": "chat", "message": "after ping"})).await;
        for client in [&mut alice, &mut bob] {
            let event = next_event(client).await;
            assert_eq!(event["username"], "Bob");
            assert_eq!(event["message"], "after ping");
        }

        bob.send(WsMessage::binary(vec![1, 2, 3])).await.unwrap();
        assert_eq!(
            next_event(&mut alice).await,
            json!({"type": "system", "message": "Bob left the room ❌"})
        );
        assert_no_event(&mut alice).await;
        assert_eq!(server.registry().len().await, 1);
    }

    #[tokio::test]
    async fn malformed_frame_disconnects_sender() {
        let (addr, server) = spawn_relay();
        let mut alice = join(addr, "Alice", "lobby").await;
        let mut mallory = join(addr, "Mallory", "lobby").await;
        next_event(&mut alice).await;

        mallory
            .send(WsMessage::text("{not json"))
            .await
            .unwrap();
        assert_eq!(
            next_event(&mut alice).await,
            json!({"type": "system", "message": "Mallory left the room ❌"})
        );
        assert_eq!(server.registry().len().await, 1);
    }

    #[tokio::test]
    async fn status_reports_registry_counts() {
        let server = Server::new(8);
        let (conn, _rx) = Connection::channel(8);
        server
            .registry()
            .register(conn, "Alice".to_string(), "lobby".to_string())
            .await;

        let res = warp::test::request()
            .method("GET")
            .path("/status")
            .reply(&routes(server))
            .await;
        assert_eq!(res.status(), 200);
        let body: Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(
            body,
            json!({"message": "Room relay running", "connections": 1, "rooms": 1})
        );
    }
}
