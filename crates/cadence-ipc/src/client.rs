//! IPC client implementation

use cadence_api::{Command, Request, Response, ResponsePayload, ResponseResult, StreamFrame};
use cadence_util::SessionId;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::{IpcError, IpcResult};

/// IPC Client for connecting to cadenced
pub struct IpcClient {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
    next_request_id: u64,
}

impl IpcClient {
    /// Connect to cadenced
    pub async fn connect(socket_path: impl AsRef<Path>) -> IpcResult<Self> {
        let stream = UnixStream::connect(socket_path).await?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            next_request_id: 1,
        })
    }

    /// Send a command and wait for response
    pub async fn send(&mut self, command: Command) -> IpcResult<Response> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let request = Request::new(request_id, command);
        let mut json = serde_json::to_string(&request)?;
        json.push('\n');

        self.writer.write_all(json.as_bytes()).await?;

        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(IpcError::ConnectionClosed);
        }

        let response: Response = serde_json::from_str(line.trim())?;

        Ok(response)
    }

    /// Switch this connection to a session's event stream, starting after `cursor`
    pub async fn stream_events(
        mut self,
        session_id: SessionId,
        cursor: u64,
    ) -> IpcResult<EventStream> {
        let response = self
            .send(Command::StreamEvents { session_id, cursor })
            .await?;

        match response.result {
            ResponseResult::Ok(ResponsePayload::Streaming { .. }) => {}
            ResponseResult::Ok(other) => {
                return Err(IpcError::InvalidMessage(format!(
                    "unexpected reply to stream request: {:?}",
                    other
                )));
            }
            ResponseResult::Err(e) => {
                return Err(IpcError::Refused {
                    code: e.code,
                    message: e.message,
                });
            }
        }

        Ok(EventStream {
            reader: self.reader,
            _writer: self.writer,
        })
    }
}

/// Stream frames for one session
pub struct EventStream {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    /// Dropping the write half would read as a disconnect on the server
    _writer: tokio::net::unix::OwnedWriteHalf,
}

impl EventStream {
    /// Wait for the next frame; `None` once the server closed the stream
    pub async fn next(&mut self) -> IpcResult<Option<StreamFrame>> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(None);
        }

        let frame: StreamFrame = serde_json::from_str(line.trim())?;
        Ok(Some(frame))
    }
}
