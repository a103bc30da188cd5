//! IPC server implementation

use cadence_api::{ClientInfo, Command, ErrorCode, ErrorInfo, Request, Response, StreamFrame};
use cadence_util::ClientId;
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{IpcError, IpcResult};

/// Message from client to server
pub enum ServerMessage {
    Request {
        client_id: ClientId,
        request: Request,
    },
    ClientConnected {
        client_id: ClientId,
        info: ClientInfo,
    },
    ClientDisconnected {
        client_id: ClientId,
    },
}

enum Outbound {
    Line(String),
    /// Flush pending lines, then close the connection
    Close,
}

type Clients = Arc<RwLock<HashMap<ClientId, ClientHandle>>>;

/// Lines queued per connection before senders wait on the writer
pub const OUTBOUND_QUEUE: usize = 64;

/// IPC Server
pub struct IpcServer {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    clients: Clients,
    message_tx: mpsc::UnboundedSender<ServerMessage>,
    message_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<ServerMessage>>>>,
}

struct ClientHandle {
    info: ClientInfo,
    outbound_tx: mpsc::Sender<Outbound>,
    /// Cancelled when the peer disconnects
    cancel: CancellationToken,
    /// Set once the connection switched to stream frames
    streaming: bool,
}

impl IpcServer {
    /// Create a new IPC server
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        let (message_tx, message_rx) = mpsc::unbounded_channel();

        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            listener: None,
            clients: Arc::new(RwLock::new(HashMap::new())),
            message_tx,
            message_rx: Arc::new(Mutex::new(Some(message_rx))),
        }
    }

    /// Start listening
    pub async fn start(&mut self) -> IpcResult<()> {
        // Remove existing socket if present
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;

        // Owner and group only
        std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o660))?;

        info!(path = %self.socket_path.display(), "IPC server listening");

        self.listener = Some(listener);

        Ok(())
    }

    /// Get receiver for server messages
    pub async fn take_message_receiver(&self) -> Option<mpsc::UnboundedReceiver<ServerMessage>> {
        self.message_rx.lock().await.take()
    }

    /// Accept connections in a loop
    pub async fn run(&self) -> IpcResult<()> {
        let listener = self
            .listener
            .as_ref()
            .ok_or(IpcError::NotStarted)?;

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let uid = get_peer_uid(&stream);

                    let info = ClientInfo::new();
                    let info = if let Some(u) = uid {
                        info.with_uid(u)
                    } else {
                        info
                    };
                    let client_id = info.client_id.clone();

                    info!(client_id = %client_id, uid = ?uid, "Client connected");

                    self.handle_client(stream, client_id, info).await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    async fn handle_client(&self, stream: UnixStream, client_id: ClientId, info: ClientInfo) {
        let (read_half, write_half) = stream.into_split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outbound>(OUTBOUND_QUEUE);
        let cancel = CancellationToken::new();

        {
            let mut clients = self.clients.write().await;
            clients.insert(
                client_id.clone(),
                ClientHandle {
                    info: info.clone(),
                    outbound_tx: outbound_tx.clone(),
                    cancel: cancel.clone(),
                    streaming: false,
                },
            );
        }

        let _ = self.message_tx.send(ServerMessage::ClientConnected {
            client_id: client_id.clone(),
            info,
        });

        // Reader task
        let clients = self.clients.clone();
        let message_tx = self.message_tx.clone();
        let reader_id = client_id.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(read_half);
            let mut line = String::new();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        debug!(client_id = %reader_id, "Client disconnected (EOF)");
                        break;
                    }
                    Ok(_) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }

                        let request = match serde_json::from_str::<Request>(line) {
                            Ok(request) => request,
                            Err(e) => {
                                warn!(client_id = %reader_id, error = %e, "Invalid request");
                                let response = Response::error(
                                    0,
                                    ErrorInfo::new(ErrorCode::InvalidRequest, e.to_string()),
                                );
                                if let Ok(json) = serde_json::to_string(&response) {
                                    let _ = outbound_tx.send(Outbound::Line(json)).await;
                                }
                                continue;
                            }
                        };

                        {
                            let mut clients = clients.write().await;
                            let Some(handle) = clients.get_mut(&reader_id) else {
                                break;
                            };
                            if handle.streaming {
                                warn!(client_id = %reader_id, "Request on streaming connection ignored");
                                continue;
                            }
                            if matches!(request.command, Command::StreamEvents { .. }) {
                                handle.streaming = true;
                            }
                        }

                        let _ = message_tx.send(ServerMessage::Request {
                            client_id: reader_id.clone(),
                            request,
                        });
                    }
                    Err(e) => {
                        debug!(client_id = %reader_id, error = %e, "Read error");
                        break;
                    }
                }
            }

            drop(outbound_tx);
            disconnect(&clients, &message_tx, &reader_id).await;
        });

        // Writer task
        let clients = self.clients.clone();
        let message_tx = self.message_tx.clone();
        let writer_id = client_id;
        tokio::spawn(async move {
            let mut writer = write_half;

            while let Some(outbound) = outbound_rx.recv().await {
                match outbound {
                    Outbound::Line(mut msg) => {
                        msg.push('\n');
                        if let Err(e) = writer.write_all(msg.as_bytes()).await {
                            debug!(client_id = %writer_id, error = %e, "Write error");
                            break;
                        }
                    }
                    Outbound::Close => {
                        debug!(client_id = %writer_id, "Closing connection");
                        break;
                    }
                }
            }

            let _ = writer.shutdown().await;
            disconnect(&clients, &message_tx, &writer_id).await;
        });
    }

    /// Send a response to a specific client
    pub async fn send_response(&self, client_id: &ClientId, response: Response) -> IpcResult<()> {
        let json = serde_json::to_string(&response)?;
        self.send_line(client_id, json).await
    }

    /// Send one stream frame to a streaming client
    pub async fn send_frame(&self, client_id: &ClientId, frame: &StreamFrame) -> IpcResult<()> {
        let json = serde_json::to_string(frame)?;
        self.send_line(client_id, json).await
    }

    async fn send_line(&self, client_id: &ClientId, json: String) -> IpcResult<()> {
        let (outbound_tx, cancel) = self.outbound(client_id).await?;

        // Waits for room in the queue without holding the client map
        tokio::select! {
            sent = outbound_tx.send(Outbound::Line(json)) => {
                sent.map_err(|_| IpcError::ConnectionClosed)
            }
            _ = cancel.cancelled() => Err(IpcError::ConnectionClosed),
        }
    }

    /// Close a client's connection once everything queued so far is written
    pub async fn close_client(&self, client_id: &ClientId) {
        let Ok((outbound_tx, cancel)) = self.outbound(client_id).await else {
            return;
        };

        tokio::select! {
            _ = outbound_tx.send(Outbound::Close) => {}
            _ = cancel.cancelled() => {}
        }
    }

    async fn outbound(
        &self,
        client_id: &ClientId,
    ) -> IpcResult<(mpsc::Sender<Outbound>, CancellationToken)> {
        let clients = self.clients.read().await;
        let handle = clients.get(client_id).ok_or(IpcError::ConnectionClosed)?;
        Ok((handle.outbound_tx.clone(), handle.cancel.clone()))
    }

    /// Token cancelled when the client disconnects
    pub async fn disconnect_token(&self, client_id: &ClientId) -> Option<CancellationToken> {
        let clients = self.clients.read().await;
        clients.get(client_id).map(|h| h.cancel.clone())
    }

    /// Get client info
    pub async fn get_client_info(&self, client_id: &ClientId) -> Option<ClientInfo> {
        let clients = self.clients.read().await;
        clients.get(client_id).map(|h| h.info.clone())
    }

    /// Get connected client count
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Shutdown the server
    pub fn shutdown(&self) {
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Forget a client, cancel its token and report the disconnect once
async fn disconnect(
    clients: &Clients,
    message_tx: &mpsc::UnboundedSender<ServerMessage>,
    client_id: &ClientId,
) {
    let removed = clients.write().await.remove(client_id);
    if let Some(handle) = removed {
        handle.cancel.cancel();
        let _ = message_tx.send(ServerMessage::ClientDisconnected {
            client_id: client_id.clone(),
        });
    }
}

/// Get peer UID from Unix socket
fn get_peer_uid(stream: &UnixStream) -> Option<u32> {
    use std::os::unix::io::AsFd;

    let fd = stream.as_fd();

    match nix::sys::socket::getsockopt(&fd, nix::sys::socket::sockopt::PeerCredentials) {
        Ok(cred) => Some(cred.uid()),
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IpcClient;
    use cadence_api::{EventKind, ResponsePayload, ResponseResult};
    use serde_json::json;
    use std::time::Duration;
    use tempfile::tempdir;

    async fn running_server(socket_path: &Path) -> (Arc<IpcServer>, mpsc::UnboundedReceiver<ServerMessage>) {
        let mut server = IpcServer::new(socket_path);
        server.start().await.unwrap();
        let server = Arc::new(server);
        let messages = server.take_message_receiver().await.unwrap();

        let accept = server.clone();
        tokio::spawn(async move { accept.run().await });

        (server, messages)
    }

    #[tokio::test]
    async fn test_server_start() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");

        let mut server = IpcServer::new(&socket_path);
        server.start().await.unwrap();

        assert!(socket_path.exists());
    }

    #[tokio::test]
    async fn request_response_round_trip() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("rt.sock");
        let (server, mut messages) = running_server(&socket_path).await;

        let client = tokio::spawn({
            let socket_path = socket_path.clone();
            async move {
                let mut client = IpcClient::connect(&socket_path).await.unwrap();
                client.send(Command::Ping).await.unwrap()
            }
        });

        loop {
            match messages.recv().await.unwrap() {
                ServerMessage::Request { client_id, request } => {
                    assert!(matches!(request.command, Command::Ping));
                    server
                        .send_response(
                            &client_id,
                            Response::success(request.request_id, ResponsePayload::Pong),
                        )
                        .await
                        .unwrap();
                    break;
                }
                _ => continue,
            }
        }

        let response = client.await.unwrap();
        assert_eq!(response.request_id, 1);
        assert!(matches!(response.result, ResponseResult::Ok(ResponsePayload::Pong)));
    }

    #[tokio::test]
    async fn disconnect_cancels_token() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("dc.sock");
        let (server, mut messages) = running_server(&socket_path).await;

        let client = IpcClient::connect(&socket_path).await.unwrap();

        let client_id = match messages.recv().await.unwrap() {
            ServerMessage::ClientConnected { client_id, .. } => client_id,
            _ => panic!("expected connect notification"),
        };
        let token = server.disconnect_token(&client_id).await.unwrap();
        assert!(!token.is_cancelled());

        drop(client);
        token.cancelled().await;

        loop {
            if let ServerMessage::ClientDisconnected { client_id: gone } =
                messages.recv().await.unwrap()
            {
                assert_eq!(gone, client_id);
                break;
            }
        }
        assert_eq!(server.client_count().await, 0);
        assert!(server.send_frame(&client_id, &StreamFrame::heartbeat(0)).await.is_err());
    }

    #[tokio::test]
    async fn full_queue_waits_until_disconnect() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("slow.sock");
        let (server, mut messages) = running_server(&socket_path).await;

        // Connected but never reads
        let peer = UnixStream::connect(&socket_path).await.unwrap();
        let client_id = match messages.recv().await.unwrap() {
            ServerMessage::ClientConnected { client_id, .. } => client_id,
            _ => panic!("expected connect notification"),
        };

        let frame = StreamFrame::synthetic(EventKind::Heartbeat, json!({ "pad": "x".repeat(256 * 1024) }));
        let mut blocked = false;
        for _ in 0..OUTBOUND_QUEUE + 64 {
            let send = server.send_frame(&client_id, &frame);
            if tokio::time::timeout(Duration::from_millis(200), send).await.is_err() {
                blocked = true;
                break;
            }
        }
        assert!(blocked, "sends never waited on the slow peer");

        let pending = tokio::spawn({
            let server = server.clone();
            let client_id = client_id.clone();
            async move { server.send_frame(&client_id, &frame).await }
        });
        drop(peer);

        let result = tokio::time::timeout(Duration::from_secs(5), pending)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(IpcError::ConnectionClosed)));
    }
}
