//! Registry daemon entrypoint.
//!
//! A small single-writer service that owns the durable attendance store: a
//! socket listener, strict request validation, and a SQLite sessions table
//! with a current-session pointer. The tracker mutates in-memory state first
//! and notifies here after; nothing in this process feeds back into
//! detection.

use fs_err as fs;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use roster_registry_protocol::{
    parse_attendance_update, parse_meeting_ended, parse_meeting_started, ErrorInfo, Method,
    Request, Response, MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};

mod backoff;
mod state;
mod store;

use state::SharedState;
use store::Store;

const SOCKET_NAME: &str = "registry.sock";
const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;

fn main() {
    init_logging();

    if let Ok(path) = registry_backoff_path() {
        backoff::throttle_rapid_restarts(&path);
    } else {
        warn!("Failed to resolve registry backoff path");
    }

    let socket_path = match registry_socket_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve registry socket path");
            std::process::exit(1);
        }
    };

    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare registry socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind registry socket");
            std::process::exit(1);
        }
    };

    let db_path = match registry_db_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve registry database path");
            std::process::exit(1);
        }
    };

    let store = match Store::new(db_path) {
        Ok(store) => store,
        Err(err) => {
            error!(error = %err, "Failed to initialize registry store");
            std::process::exit(1);
        }
    };

    info!(path = %socket_path.display(), "Roster registry started");
    let shared_state = Arc::new(SharedState::new(store));

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let state = Arc::clone(&shared_state);
                thread::spawn(|| handle_connection(stream, state));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept registry connection");
            }
        }
    }
}

fn init_logging() {
    let debug_enabled = env::var("ROSTER_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn roster_home() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(".roster"))
}

fn registry_socket_path() -> Result<PathBuf, String> {
    Ok(roster_home()?.join(SOCKET_NAME))
}

fn registry_db_path() -> Result<PathBuf, String> {
    Ok(roster_home()?.join("registry").join("sessions.db"))
}

fn registry_backoff_path() -> Result<PathBuf, String> {
    Ok(roster_home()?.join("registry").join("registry-backoff.json"))
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn handle_connection(mut stream: UnixStream, state: Arc<SharedState>) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    tracing::debug!(method = ?request.method, id = ?request.id, "Registry request received");
    let response = handle_request(request, state);
    let _ = write_response(&mut stream, response);
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

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

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let request_bytes = match newline_index {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn handle_request(request: Request, state: Arc<SharedState>) -> Response {
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
        Method::GetStatus => match state.status_snapshot() {
            Ok(snapshot) => serialize_ok(request.id, &snapshot),
            Err(err) => Response::error(
                request.id,
                "status_error",
                format!("Failed to fetch status: {}", err),
            ),
        },
        Method::GetSessions => match state.sessions_snapshot() {
            Ok(sessions) => {
                tracing::debug!(sessions = sessions.len(), "Sessions snapshot");
                serialize_ok(request.id, &sessions)
            }
            Err(err) => Response::error(
                request.id,
                "sessions_error",
                format!("Failed to fetch sessions: {}", err),
            ),
        },
        Method::MeetingStarted => {
            with_params(request, |params| parse_meeting_started(params), |parsed| {
                state.meeting_started(&parsed)
            })
        }
        Method::AttendanceUpdate => {
            with_params(request, |params| parse_attendance_update(params), |parsed| {
                state.attendance_update(&parsed)
            })
        }
        Method::MeetingEnded => {
            with_params(request, |params| parse_meeting_ended(params), |parsed| {
                state.meeting_ended(&parsed)
            })
        }
        Method::ForceScan | Method::StopTracking => Response::error(
            request.id,
            "unsupported_method",
            "method is served by the tracker control socket",
        ),
    }
}

fn with_params<T>(
    request: Request,
    parse: impl FnOnce(serde_json::Value) -> Result<T, ErrorInfo>,
    apply: impl FnOnce(T) -> Result<(), String>,
) -> Response {
    let params = match request.params {
        Some(params) => params,
        None => return Response::error(request.id, "invalid_params", "params are required"),
    };
    let parsed = match parse(params) {
        Ok(parsed) => parsed,
        Err(err) => return Response::error_with_info(request.id, err),
    };
    match apply(parsed) {
        Ok(()) => Response::ok(request.id, serde_json::json!({"accepted": true})),
        Err(err) => Response::error(request.id, "store_error", err),
    }
}

fn serialize_ok<T: serde::Serialize>(id: Option<String>, value: &T) -> Response {
    match serde_json::to_value(value) {
        Ok(value) => Response::ok(id, value),
        Err(err) => Response::error(
            id,
            "serialization_error",
            format!("Failed to serialize response: {}", err),
        ),
    }
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}
