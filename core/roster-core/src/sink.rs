//! Client helper for notifying the session registry.
//!
//! The registry owns the durable copy; the core fires notifications after
//! mutating its own state and never blocks tracking on delivery. Failure is
//! non-fatal by contract: callers log and move on, state is already safe.

use roster_registry_protocol::{
    AttendanceUpdateParams, MeetingEndedParams, MeetingStartedParams, Method, Request, Response,
    MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};
use serde::Serialize;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

const READ_TIMEOUT_MS: u64 = 600;
const WRITE_TIMEOUT_MS: u64 = 600;
const RETRY_DELAY_MS: u64 = 50;

/// Where lifecycle and attendance notifications go.
pub trait RegistrySink: Send + Sync {
    fn meeting_started(&self, params: &MeetingStartedParams) -> Result<(), String>;
    fn attendance_update(&self, params: &AttendanceUpdateParams) -> Result<(), String>;
    fn meeting_ended(&self, params: &MeetingEndedParams) -> Result<(), String>;
}

/// Talks to the registry daemon over its Unix socket. One retry after a short
/// delay; the same request id is reused so the registry can dedupe.
#[derive(Debug, Clone)]
pub struct SocketRegistrySink {
    socket_path: PathBuf,
}

impl SocketRegistrySink {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    fn send<T: Serialize>(&self, method: Method, meeting_id: &str, params: &T) -> Result<(), String> {
        let params = serde_json::to_value(params)
            .map_err(|err| format!("Failed to serialize params: {}", err))?;
        let id = format!(
            "{}-{}-{}",
            meeting_id,
            method_label(method),
            chrono::Utc::now().timestamp_millis()
        );
        let build_request = || Request {
            protocol_version: PROTOCOL_VERSION,
            method,
            id: Some(id.clone()),
            params: Some(params.clone()),
        };

        match self.send_request(build_request()) {
            Ok(_) => Ok(()),
            Err(err) => {
                tracing::warn!(error = %err, method = method_label(method), "Registry send failed; retrying once");
                std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS));
                self.send_request(build_request()).map(|_| ())
            }
        }
    }

    fn send_request(&self, request: Request) -> Result<Response, String> {
        let mut stream = UnixStream::connect(&self.socket_path)
            .map_err(|err| format!("Failed to connect to registry socket: {}", err))?;
        let _ = stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)));
        let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));

        serde_json::to_writer(&mut stream, &request)
            .map_err(|err| format!("Failed to write request: {}", err))?;
        stream
            .write_all(b"\n")
            .map_err(|err| format!("Failed to flush request: {}", err))?;
        stream.flush().ok();

        let response = read_response(&mut stream)?;
        if response.ok {
            Ok(response)
        } else {
            Err(response
                .error
                .map(|err| format!("{}: {}", err.code, err.message))
                .unwrap_or_else(|| "Unknown registry error".to_string()))
        }
    }
}

impl RegistrySink for SocketRegistrySink {
    fn meeting_started(&self, params: &MeetingStartedParams) -> Result<(), String> {
        self.send(Method::MeetingStarted, &params.meeting_id, params)
    }

    fn attendance_update(&self, params: &AttendanceUpdateParams) -> Result<(), String> {
        self.send(Method::AttendanceUpdate, &params.meeting_id, params)
    }

    fn meeting_ended(&self, params: &MeetingEndedParams) -> Result<(), String> {
        self.send(Method::MeetingEnded, &params.meeting_id, params)
    }
}

fn method_label(method: Method) -> &'static str {
    match method {
        Method::GetHealth => "get_health",
        Method::GetStatus => "get_status",
        Method::GetSessions => "get_sessions",
        Method::MeetingStarted => "meeting_started",
        Method::AttendanceUpdate => "attendance_update",
        Method::MeetingEnded => "meeting_ended",
        Method::ForceScan => "force_scan",
        Method::StopTracking => "stop_tracking",
    }
}

fn read_response(stream: &mut UnixStream) -> Result<Response, String> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err("Response exceeded maximum size".to_string());
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                return Err("Timed out waiting for registry response".to_string());
            }
            Err(err) => return Err(format!("Failed to read response: {}", err)),
        }
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let response_bytes = match newline_index {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if response_bytes.is_empty() {
        return Err("Registry response was empty".to_string());
    }

    serde_json::from_slice(response_bytes)
        .map_err(|err| format!("Failed to parse response JSON: {}", err))
}
