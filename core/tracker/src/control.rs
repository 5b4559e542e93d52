//! Tracker control socket.
//!
//! Serves the query/control surface a popup or CLI consumes: GetStatus,
//! ForceScan, StopTracking. Every request is translated into a trigger on the
//! same queue the scanner runs on, so control requests are serialized with
//! scans and never touch the roster from this thread.

use roster_core::{ScanTrigger, StopReason, TrackerStatus};
use roster_registry_protocol::{
    ErrorInfo, Method, Request, Response, MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::Duration;
use tracing::warn;

const READ_TIMEOUT_SECS: u64 = 2;
const STATUS_REPLY_TIMEOUT_SECS: u64 = 2;

pub fn spawn_listener(
    socket_path: PathBuf,
    trigger_tx: Sender<ScanTrigger>,
) -> Result<(), String> {
    if let Some(parent) = socket_path.parent() {
        fs_err::create_dir_all(parent)
            .map_err(|err| format!("Failed to create control socket dir: {}", err))?;
    }
    if socket_path.exists() {
        fs_err::remove_file(&socket_path)
            .map_err(|err| format!("Failed to remove existing control socket: {}", err))?;
    }
    let listener = UnixListener::bind(&socket_path)
        .map_err(|err| format!("Failed to bind control socket: {}", err))?;

    thread::spawn(move || {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let trigger_tx = trigger_tx.clone();
                    thread::spawn(move || handle_connection(stream, trigger_tx));
                }
                Err(err) => warn!(error = %err, "Failed to accept control connection"),
            }
        }
    });
    Ok(())
}

fn handle_connection(mut stream: UnixStream, trigger_tx: Sender<ScanTrigger>) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            let _ = write_response(&mut stream, Response::error_with_info(None, err));
            return;
        }
    };

    let response = handle_request(request, &trigger_tx);
    let _ = write_response(&mut stream, response);
}

fn handle_request(request: Request, trigger_tx: &Sender<ScanTrigger>) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    match request.method {
        Method::GetHealth => Response::ok(
            request.id,
            serde_json::json!({
                "status": "ok",
                "pid": std::process::id(),
                "version": env!("CARGO_PKG_VERSION"),
                "protocol_version": PROTOCOL_VERSION,
            }),
        ),
        Method::GetStatus => {
            let (reply_tx, reply_rx) = mpsc::channel();
            if trigger_tx
                .send(ScanTrigger::Status { reply: reply_tx })
                .is_err()
            {
                return Response::error(request.id, "tracker_stopped", "tracker loop is gone");
            }
            match reply_rx.recv_timeout(Duration::from_secs(STATUS_REPLY_TIMEOUT_SECS)) {
                Ok(status) => serialize_status(request.id, &status),
                Err(_) => Response::error(
                    request.id,
                    "status_timeout",
                    "tracker did not answer in time",
                ),
            }
        }
        Method::ForceScan => {
            if trigger_tx.send(ScanTrigger::Force).is_err() {
                return Response::error(request.id, "tracker_stopped", "tracker loop is gone");
            }
            Response::ok(request.id, serde_json::json!({"accepted": true}))
        }
        Method::StopTracking => {
            if trigger_tx
                .send(ScanTrigger::Stop {
                    reason: StopReason::Requested,
                })
                .is_err()
            {
                return Response::error(request.id, "tracker_stopped", "tracker loop is gone");
            }
            Response::ok(request.id, serde_json::json!({"accepted": true}))
        }
        Method::GetSessions
        | Method::MeetingStarted
        | Method::AttendanceUpdate
        | Method::MeetingEnded => Response::error(
            request.id,
            "unsupported_method",
            "method is served by the registry socket",
        ),
    }
}

fn serialize_status(id: Option<String>, status: &TrackerStatus) -> Response {
    match serde_json::to_value(status) {
        Ok(value) => Response::ok(id, value),
        Err(err) => Response::error(
            id,
            "serialization_error",
            format!("Failed to serialize status: {}", err),
        ),
    }
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    let end = buffer
        .iter()
        .position(|b| *b == b'\n')
        .unwrap_or(buffer.len());
    if buffer[..end].iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(&buffer[..end]).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}

/// Client-side helper shared by the `status` subcommand.
pub fn query(socket_path: &Path, method: Method) -> Result<Response, String> {
    let request = Request {
        protocol_version: PROTOCOL_VERSION,
        method,
        id: Some("cli".to_string()),
        params: None,
    };
    let mut stream = UnixStream::connect(socket_path)
        .map_err(|err| format!("Failed to connect to tracker socket: {}", err))?;
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    serde_json::to_writer(&mut stream, &request)
        .map_err(|err| format!("Failed to write request: {}", err))?;
    stream
        .write_all(b"\n")
        .map_err(|err| format!("Failed to flush request: {}", err))?;

    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.contains(&b'\n') {
                    break;
                }
            }
            Err(err) => return Err(format!("Failed to read response: {}", err)),
        }
    }
    let end = buffer
        .iter()
        .position(|b| *b == b'\n')
        .unwrap_or(buffer.len());
    serde_json::from_slice(&buffer[..end])
        .map_err(|err| format!("Failed to parse response: {}", err))
}
