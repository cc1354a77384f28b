//! `kapcom cpus` - list the CPUs offered by the remote selection menu.

use serde::Deserialize;
use tabled::{Table, Tabled, settings::Style};

use crate::daemon::DaemonClient;
use crate::daemon::protocol::DaemonRequest;
use crate::error::{KapcomError, Result};

#[derive(Deserialize)]
struct CpuRow {
    id: u32,
    gui_open: bool,
    telnet_count: u32,
    vessel_name: String,
    part_name: String,
    tag: String,
}

#[derive(Tabled)]
struct CpuTableRow {
    #[tabled(rename = "ID")]
    id: u32,
    #[tabled(rename = "VESSEL")]
    vessel: String,
    #[tabled(rename = "PART")]
    part: String,
    #[tabled(rename = "TAG")]
    tag: String,
    #[tabled(rename = "GUI")]
    gui: &'static str,
    #[tabled(rename = "CLIENTS")]
    clients: u32,
}

pub async fn cpus(json: bool) -> Result<()> {
    let response = DaemonClient::request(&DaemonRequest::Call {
        handler: "list_cpus".to_string(),
        args: serde_json::Value::Null,
    })
    .await?;

    if !response.success {
        return Err(KapcomError::DaemonError(
            response
                .error
                .unwrap_or_else(|| "daemon reported failure without an error message".to_string()),
        ));
    }

    let data = response.data.unwrap_or(serde_json::Value::Null);
    if json {
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    let rows: Vec<CpuRow> = serde_json::from_value(data)?;
    if rows.is_empty() {
        println!("No CPUs listed. Is a vessel on the launchpad?");
        return Ok(());
    }

    let table_rows: Vec<CpuTableRow> = rows
        .into_iter()
        .map(|r| CpuTableRow {
            id: r.id,
            vessel: r.vessel_name,
            part: r.part_name,
            tag: r.tag,
            gui: if r.gui_open { "open" } else { "-" },
            clients: r.telnet_count,
        })
        .collect();

    let mut table = Table::new(table_rows);
    table.with(Style::blank());
    println!("{table}");
    Ok(())
}
