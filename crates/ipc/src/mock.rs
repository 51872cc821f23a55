//! In-process stand-in for the host runtime, for tests
//!
//! Listens on an ephemeral loopback port, answers `hello` and `ping` on its
//! own, and serves scripted replies for everything else. Unscripted methods
//! get a JSON-RPC "method not found" error.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::connection::{read_frame, ConnectionConfig};
use crate::protocol::{
    decode_request, encode_response, RemoteError, Request, Response, DEFAULT_MAX_FRAME_BYTES,
    HELLO, PING,
};

/// Scripted reply for one method
#[derive(Debug, Clone)]
pub enum Reply {
    Result(Value),
    Error(RemoteError),
    /// Read the request and never answer
    Silent,
    /// Send this line verbatim; `{id}` is replaced with the request id
    Raw(String),
    /// Wait, then reply
    Delayed(Duration, Box<Reply>),
    /// Drop the socket without answering
    Close,
}

#[derive(Debug, Default)]
struct Script {
    replies: HashMap<String, Reply>,
    requests: Vec<Request>,
}

/// Stub host runtime bound to 127.0.0.1
pub struct MockRuntime {
    addr: SocketAddr,
    script: Arc<Mutex<Script>>,
    accept_task: JoinHandle<()>,
}

impl MockRuntime {
    pub async fn start() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let script = Arc::new(Mutex::new(Script::default()));

        let shared = Arc::clone(&script);
        let accept_task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve_client(socket, Arc::clone(&shared)));
            }
        });

        Ok(Self {
            addr,
            script,
            accept_task,
        })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Connection settings pointing at this runtime
    pub fn config(&self) -> ConnectionConfig {
        ConnectionConfig::new("127.0.0.1", self.port())
            .with_agent("test")
            .with_connect_timeout(Duration::from_secs(2))
            .with_request_timeout(Duration::from_secs(2))
    }

    pub fn reply(&self, method: &str, reply: Reply) {
        self.lock().replies.insert(method.to_string(), reply);
    }

    pub fn set_result(&self, method: &str, result: Value) {
        self.reply(method, Reply::Result(result));
    }

    pub fn set_error(&self, method: &str, code: i64, message: &str) {
        self.reply(method, Reply::Error(RemoteError::new(code, message)));
    }

    /// Every request received so far, `tools/call` already unwrapped
    pub fn requests(&self) -> Vec<Request> {
        self.lock().requests.clone()
    }

    /// Requests received for one method
    pub fn requests_for(&self, method: &str) -> Vec<Request> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method)
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for MockRuntime {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve_client(socket: TcpStream, script: Arc<Mutex<Script>>) {
    let mut stream = BufReader::new(socket);
    loop {
        let mut buf = Vec::new();
        if read_frame(&mut stream, &mut buf, DEFAULT_MAX_FRAME_BYTES)
            .await
            .is_err()
        {
            return;
        }
        let Ok(request) = decode_request(&buf) else {
            return;
        };

        let reply = {
            let mut script = script.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            script.requests.push(request.clone());
            script
                .replies
                .get(&request.method)
                .cloned()
                .unwrap_or_else(|| default_reply(&request.method))
        };

        let mut reply = reply;
        while let Reply::Delayed(delay, inner) = reply {
            tokio::time::sleep(delay).await;
            reply = *inner;
        }

        let frame = match reply {
            Reply::Result(value) => encode_response(&Response::success(&request.id, value)),
            Reply::Error(error) => encode_response(&Response::error(&request.id, error)),
            Reply::Raw(line) => format!("{}\n", line.replace("{id}", &request.id)).into_bytes(),
            Reply::Silent => continue,
            Reply::Close => return,
            Reply::Delayed(..) => unreachable!("delays are unwrapped above"),
        };

        let socket = stream.get_mut();
        if socket.write_all(&frame).await.is_err() || socket.flush().await.is_err() {
            return;
        }
    }
}

fn default_reply(method: &str) -> Reply {
    match method {
        HELLO => Reply::Result(json!({"success": true, "message": "mock runtime"})),
        PING => Reply::Result(json!({"status": "ok", "version": "mock"})),
        other => Reply::Error(RemoteError::method_not_found(other)),
    }
}
