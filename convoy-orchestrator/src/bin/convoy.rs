//! Convoy command-line entry point
//!
//! Runs a single pipeline from a JSON request file:
//!
//! ```text
//! convoy <firewall|provision|nic> <request.json>
//! ```

use convoy_core::{ConvoyConfig, ConvoyError, ConvoyResult, ValidationError};
use convoy_orchestrator::{init_tracing, Orchestrator, RunReport, TelemetryConfig};
use serde::de::DeserializeOwned;

const USAGE: &str = "usage: convoy <firewall|provision|nic> <request.json>";

fn invalid(field: &str, reason: impl Into<String>) -> ConvoyError {
    ValidationError::InvalidValue {
        field: field.to_string(),
        reason: reason.into(),
    }
    .into()
}

fn read_request<T: DeserializeOwned>(path: &str) -> ConvoyResult<T> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| invalid("request", format!("cannot read {}: {}", path, e)))?;
    serde_json::from_str(&raw).map_err(|e| invalid("request", format!("malformed {}: {}", path, e)))
}

#[tokio::main]
async fn main() -> ConvoyResult<()> {
    init_tracing(&TelemetryConfig::from_env()?)?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let [command, path] = args.as_slice() else {
        eprintln!("{}", USAGE);
        return Err(invalid("arguments", USAGE));
    };

    let config = ConvoyConfig::from_env();
    let orchestrator = Orchestrator::from_config(&config)?;

    let outcome = match command.as_str() {
        "firewall" => orchestrator.firewall_update(read_request(path)?).await,
        "provision" => orchestrator.provision_firewall(read_request(path)?).await,
        "nic" => orchestrator.nic_tag_update(read_request(path)?).await,
        other => {
            eprintln!("{}", USAGE);
            return Err(invalid("command", format!("unknown command {}", other)));
        }
    };

    match outcome {
        Ok(report) => {
            print_report(&report);
            Ok(())
        }
        Err(err) => {
            tracing::error!(error = %err, command = %command, "run failed");
            Err(err)
        }
    }
}

fn print_report(report: &RunReport) {
    println!("run {}", report.run_id);
    for message in &report.messages {
        println!("  {}", message);
    }
    for handle in &report.result.succeeded {
        println!("  {} {} {:?}", handle.node_id, handle.task_id, handle.status);
    }
}
