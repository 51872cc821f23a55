//! TCP connection to the host runtime
//!
//! One connection holds one socket and runs one request at a time. Every
//! operation that can block takes `&mut self`, so a single owner can never
//! pipeline; callers that share a connection serialize access themselves.

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::{self, Outcome, Request, Response, DEFAULT_MAX_FRAME_BYTES, HELLO, PING};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 9876;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Name this client announces in the handshake
pub const CLIENT_NAME: &str = "supex-driver";

/// Settings for a [`Connection`]
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    /// Bound on TCP connect plus handshake
    pub connect_timeout: Duration,
    /// Default bound used by [`Connection::ping`] and callers without their own
    pub request_timeout: Duration,
    /// Who is driving the host ("user", "mcp", an agent name)
    pub agent: String,
    pub token: Option<String>,
    pub max_response_bytes: usize,
    /// Send `hello` after connecting
    pub handshake: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_TIMEOUT,
            agent: "unknown".to_string(),
            token: None,
            max_response_bytes: DEFAULT_MAX_FRAME_BYTES,
            handshake: true,
        }
    }
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = agent.into();
        self
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Lifecycle state of a [`Connection`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Persistent connection to the host runtime
///
/// A new connection is idle and opens its socket on the first
/// [`send_command`](Self::send_command). After any explicit
/// [`connect`](Self::connect) or [`disconnect`](Self::disconnect), or after a
/// connection-fatal error, it never opens a socket on its own again.
#[derive(Debug)]
pub struct Connection {
    config: ConnectionConfig,
    state: ConnectionState,
    stream: Option<BufReader<TcpStream>>,
    /// Still allowed to connect implicitly on first use
    idle: bool,
    /// Id of the request whose reply has not been consumed yet
    in_flight: Option<String>,
}

impl Connection {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
            stream: None,
            idle: true,
            in_flight: None,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Current state; a request abandoned mid-exchange counts as Failed
    pub fn state(&self) -> ConnectionState {
        if self.in_flight.is_some() {
            ConnectionState::Failed
        } else {
            self.state
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Open a fresh socket and identify with the host
    ///
    /// Any existing socket is closed first.
    pub async fn connect(&mut self) -> Result<()> {
        self.disconnect();
        self.state = ConnectionState::Connecting;

        let bound = self.config.connect_timeout;
        let start = Instant::now();
        let opened = match tokio::time::timeout(bound, self.open()).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(bound)),
        };

        match opened {
            Ok(stream) => {
                self.stream = Some(stream);
                self.state = ConnectionState::Connected;
                info!(
                    address = %self.config.address(),
                    agent = %self.config.agent,
                    connect_ms = start.elapsed().as_micros() as f64 / 1000.0,
                    "Connected to host runtime"
                );
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Failed;
                warn!(address = %self.config.address(), "Failed to connect: {}", e);
                Err(e)
            }
        }
    }

    /// Release the socket. Safe to call in any state, any number of times.
    pub fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            debug!(address = %self.config.address(), "Disconnected from host runtime");
        }
        self.idle = false;
        self.in_flight = None;
        self.state = ConnectionState::Disconnected;
    }

    /// Liveness check with the reserved `ping` method
    pub async fn ping(&mut self) -> Result<Value> {
        let timeout = self.config.request_timeout;
        self.send_command(PING, json!({}), timeout).await
    }

    /// Send one request and wait for its reply
    ///
    /// Remote errors come back as [`Error::Remote`] and leave the connection
    /// usable. Every other error marks it Failed and drops the socket; a late
    /// reply to the abandoned request dies with that socket.
    pub async fn send_command(
        &mut self,
        method: &str,
        params: impl Serialize,
        timeout: Duration,
    ) -> Result<Value> {
        let request = Request::new(method, params)
            .map_err(|e| Error::protocol(format!("cannot encode params for {}: {}", method, e)))?;

        self.ready().await?;

        let max = self.config.max_response_bytes;
        let Some(stream) = self.stream.as_mut() else {
            return Err(Error::connection("not connected"));
        };

        trace!("Sending request: {} (id={})", request.method, request.id);
        self.in_flight = Some(request.id.clone());
        let start = Instant::now();
        let exchanged = exchange(stream, &request, timeout, max).await;
        let elapsed = start.elapsed();
        self.in_flight = None;

        let response = match exchanged {
            Ok(response) => response,
            Err(e) => return Err(self.fail(e)),
        };

        if response.id != request.id {
            return Err(self.fail(Error::protocol(format!(
                "response id mismatch: expected {}, got {}",
                request.id, response.id
            ))));
        }

        debug!(
            method = %request.method,
            total_ms = elapsed.as_micros() as f64 / 1000.0,
            error = response.is_error(),
            "Request complete"
        );

        match response.outcome {
            Outcome::Result(value) => Ok(value),
            Outcome::Error(remote) => {
                debug!(method = %request.method, code = %remote.code, "Remote execution failed: {}", remote.message);
                Err(Error::Remote(remote))
            }
        }
    }

    /// Make sure a request may be sent, connecting if still idle
    async fn ready(&mut self) -> Result<()> {
        if let Some(stale) = self.in_flight.take() {
            return Err(self.fail(Error::connection(format!(
                "request {} was abandoned before its reply arrived; reconnect required",
                stale
            ))));
        }

        match self.state {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Disconnected if self.idle => self.connect().await,
            state => Err(Error::connection(format!(
                "connection to {} is {}; call connect() first",
                self.config.address(),
                state
            ))),
        }
    }

    fn fail(&mut self, err: Error) -> Error {
        warn!(
            address = %self.config.address(),
            kind = %err.kind(),
            "Connection failed: {}",
            err
        );
        self.stream = None;
        self.in_flight = None;
        self.state = ConnectionState::Failed;
        err
    }

    async fn open(&self) -> Result<BufReader<TcpStream>> {
        let address = self.config.address();
        let socket = TcpStream::connect(&address)
            .await
            .map_err(|e| Error::connection(format!("failed to connect to {}: {}", address, e)))?;
        socket.set_nodelay(true)?;

        let mut stream = BufReader::new(socket);
        if self.config.handshake {
            self.hello(&mut stream).await?;
        }
        Ok(stream)
    }

    async fn hello(&self, stream: &mut BufReader<TcpStream>) -> Result<()> {
        let mut params = json!({
            "name": CLIENT_NAME,
            "version": env!("CARGO_PKG_VERSION"),
            "agent": self.config.agent,
            "pid": std::process::id(),
        });
        if let Some(token) = &self.config.token {
            params["token"] = json!(token);
        }

        let request = Request::with_value(HELLO, params);
        write_frame(stream, &protocol::encode(&request)).await?;

        let mut buf = Vec::new();
        read_frame(stream, &mut buf, self.config.max_response_bytes).await?;
        let response = protocol::decode(&buf)?;
        if response.id != request.id {
            return Err(Error::protocol(format!(
                "handshake reply id mismatch: expected {}, got {}",
                request.id, response.id
            )));
        }

        match response.into_result() {
            Ok(info) => {
                debug!("Hello handshake successful: {}", info);
                Ok(())
            }
            Err(remote) => Err(Error::connection(format!("handshake rejected: {}", remote.message))),
        }
    }
}

async fn exchange(
    stream: &mut BufReader<TcpStream>,
    request: &Request,
    timeout: Duration,
    max: usize,
) -> Result<Response> {
    let frame = protocol::encode(request);
    let mut buf = Vec::new();

    let bounded = tokio::time::timeout(timeout, async {
        write_frame(stream, &frame).await?;
        read_frame(stream, &mut buf, max).await?;
        Ok::<_, Error>(())
    })
    .await;

    match bounded {
        Ok(Ok(())) => {
            trace!("Received frame ({} bytes)", buf.len());
            protocol::decode(&buf)
        }
        Ok(Err(e)) => Err(e),
        Err(_) if buf.is_empty() => Err(Error::timeout(timeout)),
        Err(_) => Err(Error::protocol(format!(
            "incomplete response: timed out after {} bytes",
            buf.len()
        ))),
    }
}

async fn write_frame(stream: &mut BufReader<TcpStream>, frame: &[u8]) -> Result<()> {
    let socket = stream.get_mut();
    socket.write_all(frame).await?;
    socket.flush().await?;
    Ok(())
}

/// Read one newline-terminated frame into `buf`, without the newline
///
/// Bytes read so far stay in `buf` if the future is dropped, which lets the
/// caller tell a silent peer from a truncated reply.
pub(crate) async fn read_frame<R>(reader: &mut R, buf: &mut Vec<u8>, max: usize) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let (complete, used) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                return Err(if buf.is_empty() {
                    Error::connection("connection closed by host")
                } else {
                    Error::protocol("incomplete response: connection closed")
                });
            }
            match available.iter().position(|b| *b == b'\n') {
                Some(pos) => {
                    buf.extend_from_slice(&available[..pos]);
                    (true, pos + 1)
                }
                None => {
                    buf.extend_from_slice(available);
                    (false, available.len())
                }
            }
        };
        reader.consume(used);

        if buf.len() > max {
            return Err(Error::protocol(format!(
                "response exceeds maximum size ({} bytes)",
                max
            )));
        }
        if complete {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::mock::{MockRuntime, Reply};
    use crate::protocol::RemoteError;

    #[tokio::test]
    async fn test_read_frame_splits_on_newline() {
        let mut input: &[u8] = b"{\"a\":1}\n{\"b\":2}\n";
        let mut buf = Vec::new();
        read_frame(&mut input, &mut buf, 1024).await.unwrap();
        assert_eq!(buf, b"{\"a\":1}");

        buf.clear();
        read_frame(&mut input, &mut buf, 1024).await.unwrap();
        assert_eq!(buf, b"{\"b\":2}");
    }

    #[tokio::test]
    async fn test_read_frame_eof_classification() {
        let mut empty: &[u8] = b"";
        let mut buf = Vec::new();
        let err = read_frame(&mut empty, &mut buf, 1024).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);

        let mut partial: &[u8] = b"{\"id\":";
        let mut buf = Vec::new();
        let err = read_frame(&mut partial, &mut buf, 1024).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[tokio::test]
    async fn test_read_frame_enforces_limit() {
        let big = vec![b'x'; 64];
        let mut input: &[u8] = &big;
        let mut buf = Vec::new();
        let err = read_frame(&mut input, &mut buf, 16).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert!(err.to_string().contains("maximum size"));
    }

    #[tokio::test]
    async fn test_connect_and_ping() {
        let runtime = MockRuntime::start().await.unwrap();
        let mut conn = Connection::new(runtime.config());
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        conn.connect().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Connected);

        let pong = conn.ping().await.unwrap();
        assert_eq!(pong["status"], "ok");
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_first_use_connects_implicitly() {
        let runtime = MockRuntime::start().await.unwrap();
        runtime.set_result("eval_ruby", json!(2));

        let mut conn = Connection::new(runtime.config());
        let result = conn
            .send_command("eval_ruby", json!({"code": "1+1"}), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(result, json!(2));
        assert!(conn.is_connected());
    }

    #[tokio::test]
    async fn test_reply_id_matches_request() {
        let runtime = MockRuntime::start().await.unwrap();
        let mut conn = Connection::new(runtime.config());
        conn.ping().await.unwrap();
        conn.ping().await.unwrap();

        let pings: Vec<_> = runtime
            .requests()
            .into_iter()
            .filter(|r| r.method == PING)
            .collect();
        assert_eq!(pings.len(), 2);
        assert_ne!(pings[0].id, pings[1].id);
    }

    #[tokio::test]
    async fn test_handshake_carries_agent_and_optional_token() {
        let runtime = MockRuntime::start().await.unwrap();

        let mut conn = Connection::new(runtime.config().with_agent("tester"));
        conn.connect().await.unwrap();
        let mut conn = Connection::new(
            runtime
                .config()
                .with_agent("tester")
                .with_token(Some("secret".into())),
        );
        conn.connect().await.unwrap();

        let hellos: Vec<_> = runtime
            .requests()
            .into_iter()
            .filter(|r| r.method == HELLO)
            .collect();
        assert_eq!(hellos.len(), 2);
        assert_eq!(hellos[0].params["agent"], "tester");
        assert_eq!(hellos[0].params["name"], CLIENT_NAME);
        assert!(hellos[0].params.get("token").is_none());
        assert_eq!(hellos[1].params["token"], "secret");
    }

    #[tokio::test]
    async fn test_rejected_handshake_is_connection_error() {
        let runtime = MockRuntime::start().await.unwrap();
        runtime.reply(HELLO, Reply::Error(RemoteError::new(401, "bad token")));

        let mut conn = Connection::new(runtime.config());
        let err = conn.connect().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(err.to_string().contains("bad token"));
        assert_eq!(conn.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_connect_to_closed_port() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut conn = Connection::new(ConnectionConfig::new("127.0.0.1", port));

        let err = conn.connect().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert_ne!(conn.state(), ConnectionState::Connected);
        assert_eq!(conn.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_silent_handshake_times_out() {
        let runtime = MockRuntime::start().await.unwrap();
        runtime.reply(HELLO, Reply::Silent);

        let config = runtime
            .config()
            .with_connect_timeout(Duration::from_millis(200));
        let mut conn = Connection::new(config);
        let err = conn.connect().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(conn.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_timeout_marks_connection_failed() {
        let runtime = MockRuntime::start().await.unwrap();
        runtime.reply("eval_ruby", Reply::Silent);

        let mut conn = Connection::new(runtime.config());
        conn.connect().await.unwrap();

        let timeout = Duration::from_millis(200);
        let start = Instant::now();
        let err = conn
            .send_command("eval_ruby", json!({"code": "sleep"}), timeout)
            .await
            .unwrap_err();
        let elapsed = start.elapsed();

        assert!(matches!(err, Error::Timeout(Some(t)) if t == timeout));
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + Duration::from_secs(1));
        assert_eq!(conn.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_failed_connection_rejects_until_reconnected() {
        let runtime = MockRuntime::start().await.unwrap();
        runtime.reply("eval_ruby", Reply::Silent);

        let mut conn = Connection::new(runtime.config());
        conn.send_command("eval_ruby", json!({}), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(conn.state(), ConnectionState::Failed);

        let err = conn.ping().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert_eq!(conn.state(), ConnectionState::Failed);

        conn.connect().await.unwrap();
        conn.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_late_reply_is_not_delivered_to_next_request() {
        let runtime = MockRuntime::start().await.unwrap();
        runtime.reply(
            "get_layers",
            Reply::Delayed(Duration::from_millis(300), Box::new(Reply::Result(json!("late")))),
        );
        runtime.set_result("get_materials", json!("materials"));

        let mut conn = Connection::new(runtime.config());
        conn.send_command("get_layers", json!({}), Duration::from_millis(100))
            .await
            .unwrap_err();

        conn.connect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        let result = conn
            .send_command("get_materials", json!({}), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(result, json!("materials"));
    }

    #[tokio::test]
    async fn test_dropped_request_reports_failed() {
        let runtime = MockRuntime::start().await.unwrap();
        runtime.reply("get_layers", Reply::Silent);

        let mut conn = Connection::new(runtime.config());
        conn.connect().await.unwrap();
        let dropped = tokio::time::timeout(
            Duration::from_millis(50),
            conn.send_command("get_layers", json!({}), Duration::from_secs(2)),
        )
        .await;
        assert!(dropped.is_err());
        assert_eq!(conn.state(), ConnectionState::Failed);
        assert!(!conn.is_connected());

        conn.connect().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Connected);
        conn.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_remote_error_keeps_connection() {
        let runtime = MockRuntime::start().await.unwrap();
        runtime.set_error("eval_ruby", 1, "boom");

        let mut conn = Connection::new(runtime.config());
        let err = conn
            .send_command("eval_ruby", json!({"code": "raise 'boom'"}), Duration::from_secs(2))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::RemoteExecution);
        assert_eq!(err.message(), "boom");
        assert_eq!(conn.state(), ConnectionState::Connected);
        conn.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_reply_marks_failed() {
        let runtime = MockRuntime::start().await.unwrap();
        runtime.reply("get_selection", Reply::Raw(r#"{"jsonrpc":"2.0","result":{}}"#.into()));

        let mut conn = Connection::new(runtime.config());
        let err = conn
            .send_command("get_selection", json!({}), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(conn.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_mismatched_id_is_protocol_error() {
        let runtime = MockRuntime::start().await.unwrap();
        runtime.reply(
            "get_camera_info",
            Reply::Raw(r#"{"jsonrpc":"2.0","id":"someone-else","result":{}}"#.into()),
        );

        let mut conn = Connection::new(runtime.config());
        let err = conn
            .send_command("get_camera_info", json!({}), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert!(err.to_string().contains("mismatch"));
        assert_eq!(conn.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_host_closing_socket_is_connection_error() {
        let runtime = MockRuntime::start().await.unwrap();
        runtime.reply("open_model", Reply::Close);

        let mut conn = Connection::new(runtime.config());
        let err = conn
            .send_command("open_model", json!({"path": "/tmp/a.skp"}), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert_eq!(conn.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_requests_complete_in_issue_order() {
        let runtime = MockRuntime::start().await.unwrap();
        runtime.reply(
            "get_layers",
            Reply::Delayed(Duration::from_millis(150), Box::new(Reply::Result(json!("A")))),
        );
        runtime.set_result("get_materials", json!("B"));

        let mut conn = Connection::new(runtime.config());
        let mut seen = Vec::new();
        seen.push(
            conn.send_command("get_layers", json!({}), Duration::from_secs(2))
                .await
                .unwrap(),
        );
        seen.push(
            conn.send_command("get_materials", json!({}), Duration::from_secs(2))
                .await
                .unwrap(),
        );
        assert_eq!(seen, vec![json!("A"), json!("B")]);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let runtime = MockRuntime::start().await.unwrap();
        let mut conn = Connection::new(runtime.config());
        conn.connect().await.unwrap();

        conn.disconnect();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        conn.disconnect();
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        let err = conn.ping().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
    }

    #[tokio::test]
    async fn test_disconnect_on_fresh_connection() {
        let mut conn = Connection::new(ConnectionConfig::default());
        conn.disconnect();
        conn.disconnect();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }
}
