//! Registry of named `call` handlers.
//!
//! This is the seam through which higher-level operations (the maneuver
//! catalog and friends) reach the shared session. The daemon knows nothing
//! about a handler beyond "async function taking the shared client and an
//! argument bag, returning JSON-serializable data or failing". Unknown
//! names are rejected at dispatch.

use std::future::Future;
use std::pin::Pin;

use serde_json::{Value, json};

use crate::error::{KapcomError, Result};
use crate::protocol::ProtocolClient;

pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>>;
pub type HandlerFn = for<'a> fn(&'a mut ProtocolClient, Value) -> HandlerFuture<'a>;

pub struct HandlerRegistry {
    entries: Vec<(&'static str, HandlerFn)>,
}

impl HandlerRegistry {
    /// The built-in handler table.
    pub fn builtin() -> Self {
        let entries: Vec<(&'static str, HandlerFn)> = vec![
            ("noop", |client, args| Box::pin(noop(client, args))),
            ("list_cpus", |client, args| Box::pin(list_cpus(client, args))),
            ("vessel_info", |client, args| Box::pin(vessel_info(client, args))),
        ];
        Self { entries }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|(name, _)| *name).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| *n == name)
    }

    /// Look up and invoke a handler. `None` means the name is unknown.
    pub fn dispatch<'a>(
        &self,
        name: &str,
        client: &'a mut ProtocolClient,
        args: Value,
    ) -> Option<HandlerFuture<'a>> {
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, f)| f(client, args))
    }
}

/// Plumbing smoke test: echoes its argument bag back.
async fn noop(_client: &mut ProtocolClient, args: Value) -> Result<Value> {
    Ok(json!({ "ok": true, "echo": args }))
}

/// CPU menu entries parsed during the last handshake.
async fn list_cpus(client: &mut ProtocolClient, _args: Value) -> Result<Value> {
    Ok(json!(client.last_menu()))
}

/// Name, body, and status of the vessel the selected CPU belongs to.
async fn vessel_info(client: &mut ProtocolClient, _args: Value) -> Result<Value> {
    let timeout = client.default_execute_timeout();
    let result = client
        .execute(
            "PRINT SHIP:NAME + \"|\" + SHIP:BODY:NAME + \"|\" + SHIP:STATUS.",
            timeout,
        )
        .await;
    if !result.success {
        return Err(KapcomError::DaemonError(format!(
            "vessel_info probe failed: {}",
            result.error.unwrap_or_else(|| "no output".to_string())
        )));
    }

    let line = result
        .output
        .lines()
        .find(|l| l.matches('|').count() == 2)
        .ok_or_else(|| {
            KapcomError::DaemonError(format!(
                "vessel_info probe returned unexpected output: {:?}",
                result.output
            ))
        })?;
    let mut parts = line.splitn(3, '|');
    Ok(json!({
        "vessel": parts.next().unwrap_or_default().trim(),
        "body": parts.next().unwrap_or_default().trim(),
        "status": parts.next().unwrap_or_default().trim(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RemoteConfig;

    #[test]
    fn builtin_names_are_stable() {
        let registry = HandlerRegistry::builtin();
        assert_eq!(registry.names(), vec!["noop", "list_cpus", "vessel_info"]);
    }

    #[tokio::test]
    async fn unknown_handler_is_none() {
        let registry = HandlerRegistry::builtin();
        let mut client = ProtocolClient::new(RemoteConfig::default());
        assert!(
            registry
                .dispatch("warp_drive", &mut client, Value::Null)
                .is_none()
        );
    }

    #[tokio::test]
    async fn noop_echoes_args() {
        let registry = HandlerRegistry::builtin();
        let mut client = ProtocolClient::new(RemoteConfig::default());
        let future = registry
            .dispatch("noop", &mut client, json!({"x": 1}))
            .unwrap();
        let value = future.await.unwrap();
        assert_eq!(value["ok"], json!(true));
        assert_eq!(value["echo"]["x"], json!(1));
    }

    #[tokio::test]
    async fn list_cpus_is_empty_before_any_connect() {
        let registry = HandlerRegistry::builtin();
        let mut client = ProtocolClient::new(RemoteConfig::default());
        let value = registry
            .dispatch("list_cpus", &mut client, Value::Null)
            .unwrap()
            .await
            .unwrap();
        assert_eq!(value, json!([]));
    }
}
