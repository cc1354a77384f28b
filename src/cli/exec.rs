//! CLI commands that proxy through the daemon's shared session: exec,
//! connect, status, call, disconnect.

use serde_json::json;

use crate::daemon::protocol::{DaemonRequest, DaemonResponse};
use crate::daemon::DaemonClient;
use crate::error::{KapcomError, Result};
use crate::protocol::CpuSelector;

/// Run one script statement, auto-connecting if needed.
pub async fn exec(script: &str, timeout_ms: u64, cpu: Option<&str>, json: bool) -> Result<()> {
    if script.trim().is_empty() {
        return Err(KapcomError::InvalidArgument(
            "script must not be empty".to_string(),
        ));
    }

    if let Some(cpu) = cpu {
        let response = DaemonClient::request(&connect_request(Some(cpu))).await?;
        if !response.success {
            return Err(daemon_failure(&response));
        }
    }

    let response = DaemonClient::request(&DaemonRequest::Execute {
        command: script.to_string(),
        timeout: Some(timeout_ms),
    })
    .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return exit_status(&response);
    }

    if let Some(output) = response.output.as_deref() {
        if !output.is_empty() {
            println!("{output}");
        }
    }
    exit_status(&response)
}

/// Select a CPU; the daemon holds the session open afterwards.
pub async fn connect(cpu: Option<&str>, json: bool) -> Result<()> {
    let response = DaemonClient::request(&connect_request(cpu)).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return exit_status(&response);
    }

    if !response.success {
        return Err(daemon_failure(&response));
    }
    match response.data.as_ref() {
        Some(data) => {
            let vessel = data["vesselName"].as_str().unwrap_or("?");
            let id = data["cpuId"].as_u64().unwrap_or_default();
            match data["cpuTag"].as_str().filter(|t| !t.is_empty()) {
                Some(tag) => println!("Connected to {vessel} CPU [{id}] ({tag})"),
                None => println!("Connected to {vessel} CPU [{id}]"),
            }
        }
        None => println!("Connected."),
    }
    Ok(())
}

/// Show the daemon's connection-state snapshot.
pub async fn status(json: bool) -> Result<()> {
    let response = DaemonClient::request(&DaemonRequest::Status).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return exit_status(&response);
    }

    if !response.success {
        return Err(daemon_failure(&response));
    }

    let data = response.data.unwrap_or(json!({}));
    if data["connected"].as_bool().unwrap_or(false) {
        println!("Connected: yes");
        if let Some(vessel) = data["vessel_name"].as_str() {
            println!("  Vessel: {vessel}");
        }
        if let Some(id) = data["cpu_id"].as_u64() {
            println!("  CPU: {id}");
        }
        if let Some(tag) = data["cpu_tag"].as_str().filter(|t| !t.is_empty()) {
            println!("  Tag: {tag}");
        }
    } else {
        println!("Connected: no");
        if let Some(err) = data["last_error"].as_str() {
            println!("  Last error: {err}");
        }
    }
    Ok(())
}

/// Invoke a named daemon handler with a JSON argument bag.
pub async fn call(handler: &str, args: Option<&str>, json: bool) -> Result<()> {
    let args = match args {
        Some(raw) => serde_json::from_str(raw).map_err(|e| {
            KapcomError::InvalidArgument(format!("--args must be valid JSON: {e}"))
        })?,
        None => serde_json::Value::Null,
    };

    let response = DaemonClient::request(&DaemonRequest::Call {
        handler: handler.to_string(),
        args,
    })
    .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return exit_status(&response);
    }

    if !response.success {
        return Err(daemon_failure(&response));
    }
    if let Some(data) = response.data.as_ref() {
        println!("{}", serde_json::to_string_pretty(data)?);
    }
    Ok(())
}

/// Drop the daemon's remote session.
pub async fn disconnect(json: bool) -> Result<()> {
    // Nothing to drop if the daemon itself is down; do not spawn one
    // just to tell it to disconnect.
    if !DaemonClient::is_running() {
        if json {
            println!("{}", serde_json::to_string_pretty(&DaemonResponse::ok_empty())?);
        } else {
            println!("Not connected.");
        }
        return Ok(());
    }

    let response = DaemonClient::request_no_spawn(&DaemonRequest::Disconnect).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return exit_status(&response);
    }
    if !response.success {
        return Err(daemon_failure(&response));
    }
    println!("Disconnected.");
    Ok(())
}

fn connect_request(cpu: Option<&str>) -> DaemonRequest {
    match cpu.map(CpuSelector::parse) {
        Some(CpuSelector::Id(id)) => DaemonRequest::Connect {
            context_id: Some(id),
            context_label: None,
        },
        Some(CpuSelector::Tag(tag)) => DaemonRequest::Connect {
            context_id: None,
            context_label: Some(tag),
        },
        Some(CpuSelector::Any) | None => DaemonRequest::Connect {
            context_id: None,
            context_label: None,
        },
    }
}

fn daemon_failure(response: &DaemonResponse) -> KapcomError {
    KapcomError::DaemonError(
        response
            .error
            .clone()
            .unwrap_or_else(|| "daemon reported failure without an error message".to_string()),
    )
}

fn exit_status(response: &DaemonResponse) -> Result<()> {
    if response.success {
        Ok(())
    } else {
        Err(daemon_failure(response))
    }
}
