use matrix_core::event::{BroadcastMessage, CoreEvent};
use matrix_proto::protocol::{Broadcast, Message, MAX_FRAME_LEN, PROTOCOL_VERSION};
use matrix_proto::state::StateManager;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Framed control socket.  Every client gets a `Hello` with the current
/// state, the `State` published after each of its commands ran, and every
/// broadcast.  Undecodable frames are answered with an `Error`; oversized
/// ones end the connection.
pub fn start_server(
    bind_address: String,
    port: u16,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<CoreEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);

        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind TCP socket {}: {}", addr, e);
                return;
            }
        };

        info!("Control socket listening at {}", addr);
        serve(listener, state_manager, event_tx, broadcast_tx, cancel).await;
    })
}

async fn serve(
    listener: TcpListener,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<CoreEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    cancel: CancellationToken,
) {
    let mut client_id = 0usize;

    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = cancel.cancelled() => {
                info!("Control socket shutting down");
                break;
            }
        };

        match accepted {
            Ok((stream, peer)) => {
                client_id += 1;
                let id = client_id;
                info!("Client {} connected from {}", id, peer);

                let sm = state_manager.clone();
                let evt_tx = event_tx.clone();
                let bcast_rx = broadcast_tx.subscribe();
                let client_cancel = cancel.child_token();

                tokio::spawn(async move {
                    tokio::select! {
                        _ = handle_client(stream, sm, id, evt_tx, bcast_rx) => {}
                        _ = client_cancel.cancelled() => {}
                    }
                    info!("Client {} disconnected", id);
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    state_manager: Arc<StateManager>,
    client_id: usize,
    event_tx: mpsc::Sender<CoreEvent>,
    mut broadcast_rx: broadcast::Receiver<BroadcastMessage>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    // Send Hello with current state snapshot on connect
    if let Ok(encoded) = encode_hello(&state_manager).await {
        if write_half.write_all(&encoded).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => {
                        info!("Client {} closed connection", client_id);
                        break;
                    }
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);

                        while let Some(len) = Message::frame_len(&read_buf) {
                            if len > MAX_FRAME_LEN {
                                warn!("Client {} sent a {} byte frame, disconnecting", client_id, len);
                                return;
                            }
                            if read_buf.len() < 4 + len {
                                break;
                            }
                            let frame: Vec<u8> = read_buf.drain(..4 + len).collect();

                            let reply = match Message::decode(&frame) {
                                Ok((Message::Command(cmd), _)) => {
                                    info!("Client {} sent command: {:?}", client_id, cmd);
                                    let (reply_tx, reply_rx) = oneshot::channel();
                                    if event_tx.send(CoreEvent::ClientRequest(cmd, reply_tx)).await.is_err() {
                                        warn!("CoreEvent channel closed");
                                        return;
                                    }
                                    match reply_rx.await {
                                        Ok(data) => Message::Broadcast(Broadcast::State { data }).encode(),
                                        Err(_) => {
                                            warn!("Coordinator dropped the reply for client {}", client_id);
                                            return;
                                        }
                                    }
                                }
                                Ok(_) => continue,
                                Err(e) => {
                                    warn!("Client {} sent a bad frame: {}", client_id, e);
                                    Message::Broadcast(Broadcast::Error {
                                        message: format!("bad frame: {}", e),
                                    })
                                    .encode()
                                }
                            };
                            if let Ok(encoded) = reply {
                                if write_half.write_all(&encoded).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!("Read error from client {}: {}", client_id, e);
                        break;
                    }
                }
            }

            msg = broadcast_rx.recv() => {
                let outgoing = match msg {
                    Ok(BroadcastMessage::StateUpdated) => encode_state(&state_manager).await,
                    Ok(BroadcastMessage::TileStatus { tile, status, channel, text }) => {
                        Message::Broadcast(Broadcast::TileStatus { tile, status, channel, text }).encode()
                    }
                    Ok(BroadcastMessage::CommandFailed(message)) => {
                        Message::Broadcast(Broadcast::Error { message }).encode()
                    }
                    Ok(BroadcastMessage::Log(message)) => {
                        Message::Broadcast(Broadcast::Log { message }).encode()
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} missed {} broadcast messages", client_id, n);
                        encode_state(&state_manager).await
                    }
                    Err(_) => break,
                };
                if let Ok(encoded) = outgoing {
                    if write_half.write_all(&encoded).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

async fn encode_hello(state_manager: &StateManager) -> anyhow::Result<Vec<u8>> {
    let state = state_manager.get_state().await;
    let rev = state.rev;
    Message::Broadcast(Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        rev,
        state,
    })
    .encode()
}

async fn encode_state(state_manager: &StateManager) -> anyhow::Result<Vec<u8>> {
    let state = state_manager.get_state().await;
    Message::Broadcast(Broadcast::State { data: state }).encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use matrix_proto::protocol::{Command, MatrixState};
    use std::time::Duration;

    struct Client {
        stream: TcpStream,
        event_rx: mpsc::Receiver<CoreEvent>,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        cancel: CancellationToken,
        server: tokio::task::JoinHandle<()>,
    }

    async fn connect(initial: MatrixState) -> Client {
        let state_manager = Arc::new(StateManager::new());
        state_manager.publish(initial).await;
        let (event_tx, event_rx) = mpsc::channel(8);
        let (broadcast_tx, _) = broadcast::channel(8);
        let cancel = CancellationToken::new();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve(
            listener,
            state_manager,
            event_tx,
            broadcast_tx.clone(),
            cancel.clone(),
        ));
        let stream = TcpStream::connect(addr).await.unwrap();
        Client {
            stream,
            event_rx,
            broadcast_tx,
            cancel,
            server,
        }
    }

    async fn read_message(stream: &mut TcpStream) -> Message {
        let mut len = [0u8; 4];
        stream.read_exact(&mut len).await.unwrap();
        let mut body = vec![0u8; u32::from_be_bytes(len) as usize];
        stream.read_exact(&mut body).await.unwrap();
        let mut frame = len.to_vec();
        frame.extend_from_slice(&body);
        Message::decode(&frame).unwrap().0
    }

    fn raw_frame(body: &[u8]) -> Vec<u8> {
        let mut frame = (body.len() as u32).to_be_bytes().to_vec();
        frame.extend_from_slice(body);
        frame
    }

    /// Stand in for the coordinator: take one request and answer it.
    async fn answer(event_rx: &mut mpsc::Receiver<CoreEvent>, state: MatrixState) -> Command {
        let event = tokio::time::timeout(Duration::from_secs(2), event_rx.recv())
            .await
            .expect("command was not forwarded");
        match event {
            Some(CoreEvent::ClientRequest(cmd, reply)) => {
                reply.send(state).unwrap();
                cmd
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_hello_command_and_broadcast() {
        let mut c = connect(MatrixState {
            tile_count: 4,
            ..MatrixState::default()
        })
        .await;

        match read_message(&mut c.stream).await {
            Message::Broadcast(Broadcast::Hello {
                protocol_version,
                rev,
                state,
            }) => {
                assert_eq!(protocol_version, PROTOCOL_VERSION);
                assert_eq!(rev, 1);
                assert_eq!(state.tile_count, 4);
            }
            other => panic!("expected hello, got {:?}", other),
        }

        let frame = Message::Command(Command::ScrollRight).encode().unwrap();
        c.stream.write_all(&frame).await.unwrap();
        let after = MatrixState {
            rev: 2,
            tile_count: 4,
            viewport_column: 1,
            ..MatrixState::default()
        };
        assert_eq!(answer(&mut c.event_rx, after).await, Command::ScrollRight);
        match read_message(&mut c.stream).await {
            Message::Broadcast(Broadcast::State { data }) => {
                assert_eq!(data.rev, 2);
                assert_eq!(data.viewport_column, 1);
            }
            other => panic!("expected state, got {:?}", other),
        }

        c.broadcast_tx
            .send(BroadcastMessage::CommandFailed("nope".into()))
            .unwrap();
        match read_message(&mut c.stream).await {
            Message::Broadcast(Broadcast::Error { message }) => assert_eq!(message, "nope"),
            other => panic!("expected error, got {:?}", other),
        }

        c.cancel.cancel();
        c.server.await.unwrap();
    }

    #[tokio::test]
    async fn test_bad_frame_is_skipped() {
        let mut c = connect(MatrixState::default()).await;
        read_message(&mut c.stream).await;

        let mut bytes = raw_frame(br#"{"cmd":"PressChannel","channel":300}"#);
        bytes.extend(raw_frame(br#"{"cmd":"NoSuchCommand"}"#));
        bytes.extend(Message::Command(Command::ScrollRight).encode().unwrap());
        c.stream.write_all(&bytes).await.unwrap();

        for _ in 0..2 {
            match read_message(&mut c.stream).await {
                Message::Broadcast(Broadcast::Error { message }) => {
                    assert!(message.starts_with("bad frame"))
                }
                other => panic!("expected error, got {:?}", other),
            }
        }
        assert_eq!(
            answer(&mut c.event_rx, MatrixState::default()).await,
            Command::ScrollRight
        );
        assert!(matches!(
            read_message(&mut c.stream).await,
            Message::Broadcast(Broadcast::State { .. })
        ));

        c.cancel.cancel();
        c.server.await.unwrap();
    }

    #[tokio::test]
    async fn test_oversized_frame_disconnects() {
        let mut c = connect(MatrixState::default()).await;
        read_message(&mut c.stream).await;

        let header = ((MAX_FRAME_LEN + 1) as u32).to_be_bytes();
        c.stream.write_all(&header).await.unwrap();

        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_secs(2), c.stream.read(&mut buf))
            .await
            .expect("connection was not closed")
            .unwrap_or(0);
        assert_eq!(n, 0);
        assert!(c.event_rx.try_recv().is_err());

        c.cancel.cancel();
        c.server.await.unwrap();
    }
}
