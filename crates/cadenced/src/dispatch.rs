//! Request dispatch: IPC messages in, orchestrator calls and responses out

use cadence_api::{
    Command, ErrorCode, ErrorInfo, Request, Response, ResponsePayload, API_VERSION,
};
use cadence_core::{CoreError, Orchestrator};
use cadence_ipc::{IpcServer, ServerMessage};
use cadence_util::{ClientId, SessionId};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Frames buffered between a streamer and its connection writer
const STREAM_BUFFER: usize = 64;

#[derive(Clone)]
pub struct Dispatcher {
    orchestrator: Arc<Orchestrator>,
    ipc: Arc<IpcServer>,
}

impl Dispatcher {
    pub fn new(orchestrator: Arc<Orchestrator>, ipc: Arc<IpcServer>) -> Self {
        Self { orchestrator, ipc }
    }

    /// Drain server messages until the channel closes
    pub async fn run(&self, mut messages: mpsc::UnboundedReceiver<ServerMessage>) {
        while let Some(msg) = messages.recv().await {
            self.handle_message(msg).await;
        }
    }

    pub async fn handle_message(&self, msg: ServerMessage) {
        match msg {
            ServerMessage::Request { client_id, request } => {
                self.handle_request(client_id, request).await;
            }

            ServerMessage::ClientConnected { client_id, info } => {
                debug!(client_id = %client_id, uid = ?info.uid, "Client registered");
            }

            ServerMessage::ClientDisconnected { client_id } => {
                debug!(client_id = %client_id, "Client disconnected");
            }
        }
    }

    async fn handle_request(&self, client_id: ClientId, request: Request) {
        let request_id = request.request_id;

        if request.api_version != API_VERSION {
            let response = Response::error(
                request_id,
                ErrorInfo::new(
                    ErrorCode::InvalidRequest,
                    format!(
                        "Unsupported API version {} (expected {})",
                        request.api_version, API_VERSION
                    ),
                ),
            );
            let _ = self.ipc.send_response(&client_id, response).await;
            if matches!(request.command, Command::StreamEvents { .. }) {
                self.ipc.close_client(&client_id).await;
            }
            return;
        }

        if let Command::StreamEvents { session_id, cursor } = request.command {
            self.start_stream(client_id, request_id, session_id, cursor)
                .await;
            return;
        }

        let response = self.handle_command(request_id, request.command);
        if let Err(e) = self.ipc.send_response(&client_id, response).await {
            debug!(client_id = %client_id, error = %e, "Response dropped");
        }
    }

    /// Run one non-streaming command
    pub fn handle_command(&self, request_id: u64, command: Command) -> Response {
        let orchestrator = &self.orchestrator;

        let result = match command {
            Command::CreateWorkspace { name, root_path } => orchestrator
                .create_workspace(&name, root_path)
                .map(ResponsePayload::Workspace),

            Command::StartSession {
                workspace_id,
                goal,
                time_budget_minutes,
                focus,
            } => orchestrator
                .start(&workspace_id, &goal, time_budget_minutes, focus)
                .map(|session| ResponsePayload::SessionCreated {
                    session_id: session.session_id,
                    status: session.status,
                }),

            Command::CancelSession { session_id } => orchestrator
                .cancel(&session_id)
                .map(|_| ResponsePayload::Cancelled { ok: true }),

            Command::EndSession {
                session_id,
                summary,
            } => orchestrator
                .end(&session_id, summary)
                .map(|summary| ResponsePayload::Ended {
                    ok: true,
                    summary: summary.text,
                }),

            Command::GetSession { session_id } => orchestrator
                .session_view(&session_id)
                .map(ResponsePayload::Session),

            Command::ListTasks { session_id } => orchestrator
                .list_tasks(&session_id)
                .map(|tasks| ResponsePayload::Tasks { tasks }),

            Command::UpdateTask {
                task_id,
                status,
                notes,
            } => orchestrator
                .update_task(&task_id, status, notes)
                .map(ResponsePayload::Task),

            Command::StreamEvents { .. } => {
                return Response::error(
                    request_id,
                    ErrorInfo::new(
                        ErrorCode::InvalidRequest,
                        "Streams are opened per connection",
                    ),
                );
            }

            Command::GetHealth => Ok(ResponsePayload::Health(orchestrator.health())),

            Command::Ping => Ok(ResponsePayload::Pong),
        };

        match result {
            Ok(payload) => Response::success(request_id, payload),
            Err(e) => {
                log_command_error(request_id, &e);
                Response::error(request_id, e.to_error_info())
            }
        }
    }

    /// Acknowledge a stream request and forward frames until the stream ends.
    /// The connection is closed afterwards either way.
    async fn start_stream(
        &self,
        client_id: ClientId,
        request_id: u64,
        session_id: SessionId,
        cursor: u64,
    ) {
        let streamer = match self.orchestrator.open_stream(&session_id) {
            Ok(streamer) => streamer,
            Err(e) => {
                log_command_error(request_id, &e);
                let _ = self
                    .ipc
                    .send_response(&client_id, Response::error(request_id, e.to_error_info()))
                    .await;
                self.ipc.close_client(&client_id).await;
                return;
            }
        };

        let Some(cancel) = self.ipc.disconnect_token(&client_id).await else {
            debug!(client_id = %client_id, "Client gone before stream start");
            return;
        };

        let ack = Response::success(
            request_id,
            ResponsePayload::Streaming {
                session_id: session_id.clone(),
                cursor,
            },
        );
        if self.ipc.send_response(&client_id, ack).await.is_err() {
            return;
        }

        info!(client_id = %client_id, session_id = %session_id, cursor, "Stream started");

        let ipc = self.ipc.clone();
        tokio::spawn(async move {
            let (frame_tx, mut frame_rx) = mpsc::channel(STREAM_BUFFER);

            let run = streamer.run(session_id.clone(), cursor, frame_tx, cancel.clone());
            // Owns the receiver so a dead connection also unblocks the streamer
            let forward = {
                let ipc = ipc.clone();
                let client_id = client_id.clone();
                let cancel = cancel.clone();
                async move {
                    while let Some(frame) = frame_rx.recv().await {
                        if ipc.send_frame(&client_id, &frame).await.is_err() {
                            cancel.cancel();
                            break;
                        }
                    }
                }
            };

            let (outcome, ()) = tokio::join!(run, forward);
            info!(
                client_id = %client_id,
                session_id = %session_id,
                ?outcome,
                "Stream closed"
            );
            ipc.close_client(&client_id).await;
        });
    }
}

fn log_command_error(request_id: u64, e: &CoreError) {
    match e {
        CoreError::NotFound(_) | CoreError::Conflict { .. } | CoreError::Validation(_) => {
            debug!(request_id, error = %e, "Command rejected");
        }
        _ => warn!(request_id, error = %e, "Command failed"),
    }
}
