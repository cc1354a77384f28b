//! Connection manager for one remote console session.
//!
//! State machine: `Disconnected -> Connecting -> Connected`. A stale
//! connection (session open but no longer responding) is never tracked as
//! a distinct state; the health checker detects it and the owner recycles
//! the client.

use std::time::Duration;

use tracing::{debug, warn};

use crate::config::{RemoteConfig, TransportKind};
use crate::error::{KapcomError, Result};
use crate::protocol::clean::clean_output;
use crate::protocol::errors::classify;
use crate::protocol::menu::{self, MENU_MARKER, MenuEntry};
use crate::protocol::sentinel::Sentinel;
use crate::protocol::{CommandResult, ConnectInfo, ConnectionState, CpuSelector};
use crate::transport::{DETACH_BYTE, Pattern, TcpTransport, TmuxTransport, Transport};

/// Wait budgets for each handshake phase.
#[derive(Debug, Clone)]
pub struct Timeouts {
    /// Waiting for the CPU menu on a fresh session.
    pub menu: Duration,
    /// Waiting for the menu again after kicking a stuck prior session.
    pub reboot: Duration,
    /// Waiting for the ready banner after selecting a CPU.
    pub ready: Duration,
    /// Default per-execute budget when the caller gives none.
    pub execute_default: Duration,
    /// Fallback prompt wait after a sentinel timeout.
    pub prompt_fallback: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            menu: Duration::from_secs(5),
            reboot: Duration::from_secs(15),
            ready: Duration::from_secs(3),
            execute_default: Duration::from_secs(5),
            prompt_fallback: Duration::from_millis(500),
        }
    }
}

fn ready_pattern() -> Pattern {
    Pattern::Regex(regex::Regex::new(r"(?m)^Proceed\.").expect("ready regex"))
}

fn prompt_pattern() -> Pattern {
    Pattern::Regex(regex::Regex::new(r"(?m)^>\s*$").expect("prompt regex"))
}

pub struct ProtocolClient {
    remote: RemoteConfig,
    timeouts: Timeouts,
    transport: Option<Transport>,
    state: ConnectionState,
    /// Menu entries parsed during the last connect; kept so callers can
    /// list CPUs without a second handshake.
    last_menu: Vec<MenuEntry>,
}

impl ProtocolClient {
    pub fn new(remote: RemoteConfig) -> Self {
        Self {
            remote,
            timeouts: Timeouts::default(),
            transport: None,
            state: ConnectionState::default(),
            last_menu: Vec::new(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.connected
    }

    pub fn last_menu(&self) -> &[MenuEntry] {
        &self.last_menu
    }

    pub fn default_execute_timeout(&self) -> Duration {
        self.timeouts.execute_default
    }

    fn make_transport(&self) -> Transport {
        match self.remote.transport {
            TransportKind::Tcp => {
                Transport::Tcp(TcpTransport::new(self.remote.host.clone(), self.remote.port))
            }
            TransportKind::Tmux => {
                Transport::Tmux(TmuxTransport::new(self.remote.host.clone(), self.remote.port))
            }
        }
    }

    /// Perform the menu-driven handshake and select a CPU.
    ///
    /// Failures at any step are recorded into state, the client is marked
    /// disconnected, and the error propagates.
    pub async fn connect(&mut self, selector: &CpuSelector) -> Result<ConnectInfo> {
        match self.connect_inner(selector).await {
            Ok(info) => Ok(info),
            Err(e) => {
                self.state.last_error = Some(e.to_string());
                self.state.connected = false;
                self.state.cpu_id = None;
                self.state.cpu_tag = None;
                self.state.vessel_name = None;
                if let Some(mut transport) = self.transport.take() {
                    transport.close().await;
                }
                Err(e)
            }
        }
    }

    async fn connect_inner(&mut self, selector: &CpuSelector) -> Result<ConnectInfo> {
        if self.transport.is_none() {
            self.transport = Some(self.make_transport());
        }
        let menu_timeout = self.timeouts.menu;
        let reboot_timeout = self.timeouts.reboot;
        let ready_timeout = self.timeouts.ready;
        let transport = self.transport.as_mut().expect("transport just created");
        transport.init().await?;

        let menu_pattern = Pattern::Literal(MENU_MARKER.to_string());
        let menu_text = match transport.wait_for(&menu_pattern, menu_timeout).await {
            Ok(buffer) => buffer,
            Err(e) if e.partial().is_some() => {
                // No menu: a prior session is probably still attached.
                // Kick it loose and wait for the menu with the longer
                // reboot budget.
                debug!("no CPU menu; assuming stale attached session, rebooting");
                let _ = transport.read().await;
                transport.send_raw(&[DETACH_BYTE]).await?;
                transport.send("reboot.").await?;
                match transport.wait_for(&menu_pattern, reboot_timeout).await {
                    Ok(buffer) => buffer,
                    Err(e) if e.partial().is_some() => {
                        return Err(KapcomError::RemoteUnreachable(format!(
                            "console never showed its CPU menu ({e})"
                        )));
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Err(e) => return Err(e.into()),
        };

        self.last_menu = menu::parse_menu(&menu_text);
        let entry = menu::resolve(&self.last_menu, selector)?.clone();

        transport.send(&entry.id.to_string()).await?;
        match transport.wait_for(&ready_pattern(), ready_timeout).await {
            Ok(_) => {}
            Err(e) if e.partial().is_some() => {
                // A resumed session shows no ready banner; settle instead
                // of failing.
                debug!(cpu = entry.id, "no ready banner, assuming resumed session");
                let _ = transport.read().await;
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            Err(e) => return Err(e.into()),
        }

        self.state = ConnectionState {
            connected: true,
            cpu_id: Some(entry.id),
            cpu_tag: Some(entry.tag.clone()),
            vessel_name: Some(entry.vessel_name.clone()),
            last_error: None,
        };
        debug!(cpu = entry.id, vessel = %entry.vessel_name, "connected");

        Ok(ConnectInfo {
            vessel_name: entry.vessel_name,
            cpu_id: entry.id,
            cpu_tag: entry.tag,
        })
    }

    /// Execute one script and return its framed output.
    ///
    /// Never throws for remote-side conditions; transport death is folded
    /// into the result and the client flips to disconnected so the next
    /// call triggers a fresh connect.
    pub async fn execute(&mut self, script: &str, timeout: Duration) -> CommandResult {
        if !self.state.connected || self.transport.is_none() {
            return CommandResult::fail("", "Not connected to a CPU. Connect first.");
        }

        let sentinel = Sentinel::generate(script);
        let mut sent: Vec<String> = script.lines().map(|l| l.trim().to_string()).collect();
        sent.push(sentinel.print_command());

        let raw = match self.run_framed(script, &sentinel, timeout).await {
            Ok(raw) => raw,
            Err(e) => {
                let msg = e.to_string();
                if let KapcomError::Transport(te) = &e {
                    if te.is_disconnect() {
                        warn!("transport died mid-execute: {te}");
                        self.state.connected = false;
                        self.state.cpu_id = None;
                        self.state.cpu_tag = None;
                        self.state.last_error = Some(msg.clone());
                        self.transport = None;
                    }
                }
                return CommandResult::fail("", msg);
            }
        };

        let cleaned = clean_output(&raw, &sent, sentinel.token());
        match classify(&cleaned) {
            Some(kind) => {
                self.state.last_error = Some(kind.message().to_string());
                CommandResult::fail(cleaned, kind.message())
            }
            None => CommandResult::ok(cleaned),
        }
    }

    /// Send script + sentinel print, then collect raw output up to the
    /// sentinel. On sentinel timeout fall back to the generic prompt, and
    /// failing that keep whatever is buffered.
    async fn run_framed(
        &mut self,
        script: &str,
        sentinel: &Sentinel,
        timeout: Duration,
    ) -> Result<String> {
        let prompt_fallback = self.timeouts.prompt_fallback;
        let transport = self.transport.as_mut().ok_or(KapcomError::NotConnected)?;

        // Stray bytes from earlier activity would confuse echo stripping.
        let _ = transport.read().await?;

        transport.send(script).await?;
        transport.send(&sentinel.print_command()).await?;

        match transport.wait_for(&sentinel.pattern(), timeout).await {
            Ok(buffer) => Ok(buffer),
            Err(e) if e.partial().is_some() => {
                let partial = e.partial().unwrap_or_default().to_string();
                debug!("sentinel not seen in time, falling back to prompt wait");
                match transport.wait_for(&prompt_pattern(), prompt_fallback).await {
                    Ok(rest) => Ok(partial + &rest),
                    Err(e2) if e2.partial().is_some() => {
                        Ok(partial + e2.partial().unwrap_or_default())
                    }
                    Err(e2) => Err(e2.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Probe whether the transport is still alive when the remote process
    /// has gone quiet: send the detach sequence and look for the CPU menu.
    ///
    /// `true` means the console answered (remote process merely dormant,
    /// e.g. out of power); `false` means nothing answered (destroyed or
    /// crashed).
    pub async fn try_detach(&mut self, timeout: Duration) -> bool {
        let Some(transport) = self.transport.as_mut() else {
            return false;
        };
        if transport.send_raw(&[DETACH_BYTE]).await.is_err() {
            return false;
        }
        let menu_pattern = Pattern::Literal(MENU_MARKER.to_string());
        match transport.wait_for(&menu_pattern, timeout).await {
            Ok(_) => {
                // We are back at the menu; the session is no longer
                // attached to a CPU.
                self.state.connected = false;
                self.state.cpu_id = None;
                self.state.cpu_tag = None;
                true
            }
            Err(_) => false,
        }
    }

    /// Tear down the session. Idempotent.
    pub async fn disconnect(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
        self.state.connected = false;
        self.state.cpu_id = None;
        self.state.cpu_tag = None;
        self.state.vessel_name = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RemoteConfig;

    fn client() -> ProtocolClient {
        ProtocolClient::new(RemoteConfig::default())
    }

    #[tokio::test]
    async fn execute_without_connection_is_structured_failure() {
        let mut client = client();
        let result = client.execute("PRINT 1.", Duration::from_secs(1)).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Not connected"));
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let mut client = client();
        client.disconnect().await;
        assert!(!client.state().connected);
        assert!(client.state().cpu_id.is_none());
        client.disconnect().await;
        assert!(!client.state().connected);
        assert!(client.state().cpu_id.is_none());
    }

    #[tokio::test]
    async fn try_detach_without_transport_is_false() {
        let mut client = client();
        assert!(!client.try_detach(Duration::from_millis(50)).await);
    }

    #[test]
    fn disconnected_state_invariant() {
        let client = client();
        assert!(!client.state().connected);
        assert!(client.state().cpu_id.is_none());
    }
}
