//! Daemon server: owns the one shared session, dispatches NDJSON requests
//! from any number of concurrent CLI connections, and shuts itself down
//! after an idle period.
//!
//! The shared `ProtocolClient` is the single piece of mutable shared
//! state. It sits behind a `tokio::sync::Mutex`, which structurally
//! enforces the framing invariant: at most one in-flight remote command at
//! a time, however many client sockets are open.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::json;
use tokio::select;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{Config, RemoteConfig};
use crate::daemon::handlers::HandlerRegistry;
use crate::daemon::listener::{IpcConnection, IpcListener};
use crate::daemon::protocol::{DaemonRequest, DaemonResponse};
use crate::error::{KapcomError, Result};
use crate::health::{self, Health};
use crate::protocol::{CommandResult, ConnectInfo, ConnectionState, CpuSelector, ProtocolClient};

/// A connected-looking session older than this gets a health probe before
/// reuse.
const HEALTH_RECHECK_AFTER: Duration = Duration::from_secs(30);
/// How often the idle timer is evaluated.
const IDLE_TICK: Duration = Duration::from_secs(5);

/// The daemon's one remote session. Lazily created, silently discarded and
/// recreated when health checking finds it stale; callers only ever see a
/// normal connect/execute cycle.
pub struct SharedSession {
    remote: RemoteConfig,
    client: Option<ProtocolClient>,
    last_used: Option<Instant>,
}

impl SharedSession {
    pub fn new(remote: RemoteConfig) -> Self {
        Self {
            remote,
            client: None,
            last_used: None,
        }
    }

    pub fn state_snapshot(&self) -> ConnectionState {
        self.client
            .as_ref()
            .map(|c| c.state().clone())
            .unwrap_or_default()
    }

    pub fn is_connected(&self) -> bool {
        self.client.as_ref().is_some_and(|c| c.is_connected())
    }

    /// Explicit connect: always runs a fresh handshake for the requested
    /// CPU.
    pub async fn connect(&mut self, selector: &CpuSelector) -> Result<ConnectInfo> {
        if let Some(client) = self.client.as_mut() {
            client.disconnect().await;
        }
        let remote = self.remote.clone();
        let client = self
            .client
            .get_or_insert_with(|| ProtocolClient::new(remote));
        let info = client.connect(selector).await?;
        self.last_used = Some(Instant::now());
        Ok(info)
    }

    /// Make sure a usable session exists, reusing the current one when it
    /// is fresh, health-probing it when it has sat idle, and reconnecting
    /// from scratch when it is stale or absent.
    ///
    /// A stale session is diagnosed (signal lost / no power / destroyed)
    /// before being recycled; if the replacement connect then also fails,
    /// the diagnosis rides along in the error so the caller learns which
    /// condition to wait out.
    pub async fn ensure_connected(&mut self) -> Result<()> {
        let mut stale_resolution = None;
        if let Some(client) = self.client.as_mut() {
            if client.is_connected() {
                let needs_probe = self
                    .last_used
                    .is_none_or(|t| t.elapsed() > HEALTH_RECHECK_AFTER);
                if !needs_probe {
                    return Ok(());
                }
                let status = health::check_health(client).await;
                if status.is_healthy() {
                    self.last_used = Some(Instant::now());
                    return Ok(());
                }
                if let Health::Stale(reason) = status {
                    let diagnosis = health::diagnose_stale(client, reason).await;
                    warn!(%status, %diagnosis, "shared session is stale, recycling");
                    stale_resolution = Some(diagnosis.resolution());
                }
                client.disconnect().await;
                self.client = None;
            }
        }

        let remote = self.remote.clone();
        let client = self
            .client
            .get_or_insert_with(|| ProtocolClient::new(remote));
        match client.connect(&CpuSelector::Any).await {
            Ok(_) => {
                self.last_used = Some(Instant::now());
                Ok(())
            }
            Err(e) => match stale_resolution {
                Some(resolution) => Err(KapcomError::RemoteUnreachable(format!(
                    "{e}. {resolution}"
                ))),
                None => Err(e),
            },
        }
    }

    pub async fn execute(&mut self, command: &str, timeout: Option<Duration>) -> Result<CommandResult> {
        self.ensure_connected().await?;
        let client = self.client.as_mut().expect("ensure_connected succeeded");
        let timeout = timeout.unwrap_or_else(|| client.default_execute_timeout());
        let result = client.execute(command, timeout).await;
        if !client.is_connected() {
            // Transport died mid-execute; drop the client so the next
            // request starts from a clean connect.
            self.client = None;
        }
        self.last_used = Some(Instant::now());
        Ok(result)
    }

    pub async fn call(
        &mut self,
        registry: &HandlerRegistry,
        name: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value> {
        // Reject unknown names before touching the remote at all.
        if !registry.contains(name) {
            return Err(KapcomError::InvalidArgument(format!(
                "unknown handler: {name}. Available handlers: {}",
                registry.names().join(", ")
            )));
        }
        self.ensure_connected().await?;
        let client = self.client.as_mut().expect("ensure_connected succeeded");
        let future = registry
            .dispatch(name, client, args)
            .expect("handler name checked above");
        let value = future.await;
        if self.client.as_ref().is_some_and(|c| !c.is_connected()) {
            self.client = None;
        }
        self.last_used = Some(Instant::now());
        value
    }

    pub async fn disconnect(&mut self) {
        if let Some(mut client) = self.client.take() {
            client.disconnect().await;
        }
    }
}

/// Run the daemon's accept/dispatch loop until shutdown (signal, shutdown
/// request, or idle timeout). The listener's socket file is removed when
/// this returns.
pub async fn run(config: Config, listener: IpcListener) -> Result<()> {
    let session = Arc::new(Mutex::new(SharedSession::new(config.remote.clone())));
    let handlers = Arc::new(HandlerRegistry::builtin());
    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_notify = Arc::new(Notify::new());
    let active = Arc::new(AtomicUsize::new(0));
    let idle_since = Arc::new(std::sync::Mutex::new(Instant::now()));
    let idle_timeout = config.idle_timeout();

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut idle_tick = tokio::time::interval(IDLE_TICK);
    idle_tick.tick().await;

    info!(socket = ?listener.socket_path(), "kapcomd listening");

    loop {
        if shutdown_flag.load(Ordering::SeqCst) {
            info!("shutdown requested over IPC");
            break;
        }

        select! {
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
                break;
            }
            _ = sigint.recv() => {
                info!("received SIGINT, shutting down");
                break;
            }
            _ = shutdown_notify.notified() => {}
            _ = idle_tick.tick() => {
                if active.load(Ordering::SeqCst) == 0 {
                    let idle_for = idle_since.lock().expect("idle clock lock").elapsed();
                    if idle_for >= idle_timeout {
                        info!(?idle_for, "idle timeout reached, shutting down");
                        break;
                    }
                }
            }
            result = listener.accept() => {
                match result {
                    Ok(conn) => {
                        let session = Arc::clone(&session);
                        let handlers = Arc::clone(&handlers);
                        let shutdown_flag = Arc::clone(&shutdown_flag);
                        let shutdown_notify = Arc::clone(&shutdown_notify);
                        let active = Arc::clone(&active);
                        let idle_since = Arc::clone(&idle_since);
                        tokio::spawn(async move {
                            handle_connection(
                                conn,
                                session,
                                handlers,
                                shutdown_flag,
                                shutdown_notify,
                                active,
                                idle_since,
                            )
                            .await;
                        });
                    }
                    Err(e) => error!("accept error: {e}"),
                }
            }
        }
    }

    // Graceful teardown: release the remote session so the console does
    // not hold an orphaned attachment.
    session.lock().await.disconnect().await;
    info!("kapcomd shutdown complete");
    Ok(())
}

async fn handle_connection(
    mut conn: IpcConnection,
    session: Arc<Mutex<SharedSession>>,
    handlers: Arc<HandlerRegistry>,
    shutdown_flag: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
    active: Arc<AtomicUsize>,
    idle_since: Arc<std::sync::Mutex<Instant>>,
) {
    active.fetch_add(1, Ordering::SeqCst);

    loop {
        let request = match conn.recv_request().await {
            Ok(Some(request)) => request,
            Ok(None) => break,
            Err(e) => {
                // Malformed line (unknown type, bad JSON): report and keep
                // the connection; a protocol error must not kill the
                // daemon or the session.
                debug!("bad request: {e}");
                let _ = conn
                    .send_response(&DaemonResponse::err(format!("invalid request: {e}")))
                    .await;
                continue;
            }
        };

        let (response, should_shutdown) = dispatch(request, &session, &handlers).await;
        if conn.send_response(&response).await.is_err() {
            break;
        }
        if should_shutdown {
            shutdown_flag.store(true, Ordering::SeqCst);
            shutdown_notify.notify_one();
            break;
        }
    }

    // Last socket out restarts the idle clock.
    if active.fetch_sub(1, Ordering::SeqCst) == 1 {
        *idle_since.lock().expect("idle clock lock") = Instant::now();
    }
}

/// Dispatch one request. Every failure path is converted into a response;
/// nothing a handler does may crash the daemon.
async fn dispatch(
    request: DaemonRequest,
    session: &Mutex<SharedSession>,
    handlers: &HandlerRegistry,
) -> (DaemonResponse, bool) {
    match request {
        DaemonRequest::Ping => (DaemonResponse::ok("pong"), false),

        DaemonRequest::Status => {
            let session = session.lock().await;
            let state = session.state_snapshot();
            let connected = state.connected;
            (
                DaemonResponse::ok_empty()
                    .with_connected(connected)
                    .with_data(json!(state)),
                false,
            )
        }

        DaemonRequest::Connect {
            context_id,
            context_label,
        } => {
            let selector = CpuSelector::from_parts(context_id, context_label);
            let mut session = session.lock().await;
            match session.connect(&selector).await {
                Ok(info) => (
                    DaemonResponse::ok_empty()
                        .with_connected(true)
                        .with_data(json!({
                            "vesselName": info.vessel_name,
                            "cpuId": info.cpu_id,
                            "cpuTag": info.cpu_tag,
                        })),
                    false,
                ),
                Err(e) => (
                    DaemonResponse::err(e.to_string()).with_connected(false),
                    false,
                ),
            }
        }

        DaemonRequest::Disconnect => {
            let mut session = session.lock().await;
            session.disconnect().await;
            (DaemonResponse::ok_empty().with_connected(false), false)
        }

        DaemonRequest::Execute { command, timeout } => {
            let mut session = session.lock().await;
            match session
                .execute(&command, timeout.map(Duration::from_millis))
                .await
            {
                Ok(result) => {
                    let connected = session.is_connected();
                    (
                        DaemonResponse {
                            success: result.success,
                            output: Some(result.output),
                            error: result.error,
                            connected: Some(connected),
                            data: None,
                        },
                        false,
                    )
                }
                Err(e) => (
                    DaemonResponse::err(e.to_string()).with_connected(session.is_connected()),
                    false,
                ),
            }
        }

        DaemonRequest::Call { handler, args } => {
            let mut session = session.lock().await;
            match session.call(handlers, &handler, args).await {
                Ok(data) => (
                    DaemonResponse::ok_empty()
                        .with_connected(session.is_connected())
                        .with_data(data),
                    false,
                ),
                Err(e) => (
                    DaemonResponse::err(e.to_string()).with_connected(session.is_connected()),
                    false,
                ),
            }
        }

        DaemonRequest::Shutdown => (DaemonResponse::ok("shutting down"), true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_session() -> Mutex<SharedSession> {
        // Port 1 refuses connections, so connect attempts fail fast.
        Mutex::new(SharedSession::new(RemoteConfig {
            host: "127.0.0.1".into(),
            port: 1,
            ..RemoteConfig::default()
        }))
    }

    #[tokio::test]
    async fn ping_answers_pong() {
        let session = offline_session();
        let handlers = HandlerRegistry::builtin();
        let (response, shutdown) = dispatch(DaemonRequest::Ping, &session, &handlers).await;
        assert!(response.success);
        assert_eq!(response.output.as_deref(), Some("pong"));
        assert!(!shutdown);
    }

    #[tokio::test]
    async fn status_on_fresh_session_is_disconnected() {
        let session = offline_session();
        let handlers = HandlerRegistry::builtin();
        let (response, _) = dispatch(DaemonRequest::Status, &session, &handlers).await;
        assert!(response.success);
        assert_eq!(response.connected, Some(false));
        let data = response.data.unwrap();
        assert_eq!(data["connected"], json!(false));
        assert_eq!(data["cpu_id"], json!(null));
    }

    #[tokio::test]
    async fn execute_against_unreachable_remote_fails_cleanly() {
        let session = offline_session();
        let handlers = HandlerRegistry::builtin();
        let (response, shutdown) = dispatch(
            DaemonRequest::Execute {
                command: "PRINT 1.".into(),
                timeout: Some(500),
            },
            &session,
            &handlers,
        )
        .await;
        assert!(!response.success);
        assert!(response.error.is_some());
        assert!(!shutdown);
    }

    #[tokio::test]
    async fn unknown_call_handler_is_rejected_before_any_connect() {
        let session = offline_session();
        let handlers = HandlerRegistry::builtin();
        let (response, _) = dispatch(
            DaemonRequest::Call {
                handler: "warp_drive".into(),
                args: serde_json::Value::Null,
            },
            &session,
            &handlers,
        )
        .await;
        assert!(!response.success);
        // The name check fires first, so even with an unreachable remote
        // the error names the handler and lists the registry.
        let message = response.error.unwrap();
        assert!(message.contains("warp_drive"), "got: {message}");
        assert!(message.contains("noop"), "got: {message}");
        assert!(message.contains("vessel_info"), "got: {message}");
    }

    #[tokio::test]
    async fn shutdown_request_acks_and_flags() {
        let session = offline_session();
        let handlers = HandlerRegistry::builtin();
        let (response, shutdown) = dispatch(DaemonRequest::Shutdown, &session, &handlers).await;
        assert!(response.success);
        assert!(shutdown);
    }
}
