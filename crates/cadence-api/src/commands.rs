//! Command types for the cadenced protocol

use cadence_util::{ClientId, SessionId, TaskId, WorkspaceId};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{
    FocusWeights, HealthStatus, SessionStatus, SessionView, TaskInfo, TaskStatus, WorkspaceInfo,
    API_VERSION,
};

/// Request wrapper with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for correlation
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// The command
    pub command: Command,
}

impl Request {
    pub fn new(request_id: u64, command: Command) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            command,
        }
    }
}

/// Response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Corresponding request ID
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// Response payload or error
    pub result: ResponseResult,
}

impl Response {
    pub fn success(request_id: u64, payload: ResponsePayload) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Ok(payload),
        }
    }

    pub fn error(request_id: u64, error: ErrorInfo) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Err(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseResult {
    Ok(ResponsePayload),
    Err(ErrorInfo),
}

/// Error information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Error codes for the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    NotFound,
    /// Operation not allowed in the session's current status
    Conflict,
    ValidationError,
    InternalError,
}

/// All possible commands from clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Register a project root that sessions can plan against
    CreateWorkspace { name: String, root_path: PathBuf },

    /// Create a session and begin planning in the background
    StartSession {
        workspace_id: WorkspaceId,
        goal: String,
        time_budget_minutes: u32,
        focus: FocusWeights,
    },

    CancelSession { session_id: SessionId },

    /// End an active session, optionally supplying the summary text
    EndSession {
        session_id: SessionId,
        #[serde(default)]
        summary: Option<String>,
    },

    GetSession { session_id: SessionId },

    ListTasks { session_id: SessionId },

    /// Change a task's status or notes while its session is active
    UpdateTask {
        task_id: TaskId,
        #[serde(default)]
        status: Option<TaskStatus>,
        #[serde(default)]
        notes: Option<String>,
    },

    /// Switch this connection to streaming frames for a session.
    /// Only events with a sequence number above `cursor` are delivered.
    StreamEvents {
        session_id: SessionId,
        #[serde(default)]
        cursor: u64,
    },

    /// Get health status
    GetHealth,

    /// Ping for keepalive
    Ping,
}

/// Response payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePayload {
    Workspace(WorkspaceInfo),
    SessionCreated {
        session_id: SessionId,
        status: SessionStatus,
    },
    Cancelled {
        ok: bool,
    },
    Ended {
        ok: bool,
        summary: String,
    },
    Session(SessionView),
    Tasks {
        tasks: Vec<TaskInfo>,
    },
    Task(TaskInfo),
    /// Acknowledges `StreamEvents`; stream frames follow on the same connection
    Streaming {
        session_id: SessionId,
        cursor: u64,
    },
    Health(HealthStatus),
    Pong,
}

/// Client connection info (set by IPC layer)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub client_id: ClientId,
    /// Unix UID if available
    pub uid: Option<u32>,
}

impl ClientInfo {
    pub fn new() -> Self {
        Self {
            client_id: ClientId::new(),
            uid: None,
        }
    }

    pub fn with_uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serialization() {
        let req = Request::new(
            1,
            Command::StartSession {
                workspace_id: WorkspaceId::from("ws-1"),
                goal: "Ship login".into(),
                time_budget_minutes: 60,
                focus: FocusWeights::new(0.5, 0.5, 0.0),
            },
        );
        let json = serde_json::to_string(&req).unwrap();
        let parsed: Request = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.request_id, 1);
        assert_eq!(parsed.api_version, API_VERSION);
        assert!(matches!(
            parsed.command,
            Command::StartSession { time_budget_minutes: 60, .. }
        ));
    }

    #[test]
    fn stream_cursor_defaults_to_zero() {
        let json = r#"{"type":"stream_events","session_id":"s-1"}"#;
        let command: Command = serde_json::from_str(json).unwrap();
        match command {
            Command::StreamEvents { session_id, cursor } => {
                assert_eq!(session_id.as_str(), "s-1");
                assert_eq!(cursor, 0);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn response_serialization() {
        let resp = Response::success(
            1,
            ResponsePayload::SessionCreated {
                session_id: SessionId::from("s-1"),
                status: SessionStatus::Planning,
            },
        );

        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["result"]["ok"]["type"], "session_created");
        assert_eq!(value["result"]["ok"]["status"], "planning");

        let parsed: Response = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.request_id, 1);
    }

    #[test]
    fn error_response_shape() {
        let resp = Response::error(9, ErrorInfo::new(ErrorCode::Conflict, "session is completed"));
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["result"]["err"]["code"], "conflict");
    }
}
