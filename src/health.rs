//! Connection health probing.
//!
//! A session can look open while the remote side has silently died: the
//! vessel lost radio contact, ran out of power, or was destroyed. The
//! health checker prints a uniquely-named marker and classifies what comes
//! back. The "Signal lost" banner is emitted exactly once by the remote,
//! so every probe after the first silent failure looks like a generic
//! non-response; callers must treat `NoResponse` as possibly meaning a
//! signal loss whose banner was already consumed.

use std::fmt;
use std::time::Duration;

use tracing::debug;

use crate::protocol::ProtocolClient;
use crate::protocol::errors::SIGNAL_LOST_BANNER;
use crate::protocol::sentinel::unique_marker;
use crate::transport::contains_unquoted;

/// Budget for one probe round trip.
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);
/// Budget for the detach probe used to disambiguate liveness.
const DETACH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Stale(StaleReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    /// The remote's own signal-lost banner was in the output.
    SignalLost,
    /// Only echo came back; the interpreter produced no result. May be a
    /// latent signal loss whose one-shot banner was already consumed.
    NoResponse,
    /// The probe itself failed (transport error or not connected).
    Error,
}

impl Health {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Health::Healthy)
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Health::Healthy => write!(f, "healthy"),
            Health::Stale(StaleReason::SignalLost) => write!(f, "stale: signal lost"),
            Health::Stale(StaleReason::NoResponse) => write!(f, "stale: no response"),
            Health::Stale(StaleReason::Error) => write!(f, "stale: probe error"),
        }
    }
}

/// What a dead-looking session actually means, resolved via the detach
/// probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessDiagnosis {
    /// Console answered the detach: the CPU is merely dormant (out of
    /// power). Transient.
    NoPower,
    /// Out of radio contact. Transient.
    SignalLost,
    /// Nothing answered the detach: the vessel is destroyed or the remote
    /// process crashed. Terminal.
    Destroyed,
}

impl LivenessDiagnosis {
    /// What the user can do about it.
    pub fn resolution(&self) -> &'static str {
        match self {
            LivenessDiagnosis::NoPower => {
                "Vessel has no power. Wait for the batteries to recharge, then reconnect."
            }
            LivenessDiagnosis::SignalLost => {
                "Vessel is out of radio contact. Wait for the signal to return, then retry."
            }
            LivenessDiagnosis::Destroyed => {
                "Vessel appears destroyed or the remote process crashed. Reload or switch vessel."
            }
        }
    }
}

impl fmt::Display for LivenessDiagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.resolution())
    }
}

/// Pure classification of a probe's cleaned output, ordered per the
/// one-shot-banner semantics: the signal-lost banner wins even when the
/// output superficially also contains the marker.
pub fn classify_probe(output: &str, marker: &str) -> Health {
    let lowered = output.to_lowercase();
    if lowered.contains(&SIGNAL_LOST_BANNER.to_lowercase()) {
        return Health::Stale(StaleReason::SignalLost);
    }
    if contains_unquoted(output, marker) {
        return Health::Healthy;
    }
    Health::Stale(StaleReason::NoResponse)
}

/// Probe the client with a marker print and classify the result.
pub async fn check_health(client: &mut ProtocolClient) -> Health {
    let marker = unique_marker("HEALTH");
    let result = client
        .execute(&format!("PRINT \"{marker}\"."), PROBE_TIMEOUT)
        .await;

    // Transport-level failure or not-connected: the probe never ran.
    if !result.success && result.output.is_empty() {
        debug!(error = ?result.error, "health probe errored");
        return Health::Stale(StaleReason::Error);
    }

    let health = classify_probe(&result.output, &marker);
    debug!(%health, "health probe");
    health
}

/// Disambiguate an unresponsive session: detach succeeding means the
/// transport is alive and the CPU merely dormant; detach failing too means
/// the vessel is gone.
pub async fn diagnose_unresponsive(client: &mut ProtocolClient) -> LivenessDiagnosis {
    if client.try_detach(DETACH_TIMEOUT).await {
        LivenessDiagnosis::NoPower
    } else {
        LivenessDiagnosis::Destroyed
    }
}

/// Resolve a stale session to a diagnosis. A signal-lost banner already
/// names the cause; everything else needs the detach probe.
pub async fn diagnose_stale(
    client: &mut ProtocolClient,
    reason: StaleReason,
) -> LivenessDiagnosis {
    match reason {
        StaleReason::SignalLost => LivenessDiagnosis::SignalLost,
        StaleReason::NoResponse | StaleReason::Error => diagnose_unresponsive(client).await,
    }
}
