//! Command line arguments and the configuration built from them.

use std::collections::HashSet;
use std::path::PathBuf;

use clap::Parser;

use crate::aggregator::ReportFormat;
use crate::error::{MrError, Result};

/// Count the words of a file across a pool of worker endpoints
#[derive(Parser, Debug)]
#[command(name = "coordinator", version)]
pub struct CoordinatorArgs {
    /// Text file to count words in
    pub input: PathBuf,

    /// Ports of the worker endpoints, one slot per port
    #[arg(required = true, num_args = 1..)]
    pub ports: Vec<u16>,

    /// Host the worker endpoints listen on
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Report format written to stdout
    #[arg(long, value_enum, default_value_t = ReportFormat::Csv)]
    pub format: ReportFormat,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Serve map and reduce requests on one or more ports
#[derive(Parser, Debug)]
#[command(name = "worker", version)]
pub struct WorkerArgs {
    /// Ports to bind, one endpoint per port
    #[arg(required = true, num_args = 1..)]
    pub ports: Vec<u16>,

    /// Address to bind the endpoints on
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: String,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub input: PathBuf,
    pub ports: Vec<u16>,
    pub host: String,
    pub format: ReportFormat,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub ports: Vec<u16>,
    pub bind: String,
}

/// Every slot must map to its own endpoint, since an endpoint serves one
/// request at a time.
fn validate_ports(ports: &[u16]) -> Result<()> {
    if ports.is_empty() {
        return Err(MrError::Config("at least one port is required".into()));
    }
    let mut seen = HashSet::new();
    for &port in ports {
        if port == 0 {
            return Err(MrError::Config("port 0 is not a usable endpoint".into()));
        }
        if !seen.insert(port) {
            return Err(MrError::Config(format!("port {port} is listed twice")));
        }
    }
    Ok(())
}

impl CoordinatorArgs {
    pub fn into_config(self) -> Result<CoordinatorConfig> {
        validate_ports(&self.ports)?;
        Ok(CoordinatorConfig {
            input: self.input,
            ports: self.ports,
            host: self.host,
            format: self.format,
        })
    }
}

impl WorkerArgs {
    pub fn into_config(self) -> Result<WorkerConfig> {
        validate_ports(&self.ports)?;
        Ok(WorkerConfig {
            ports: self.ports,
            bind: self.bind,
        })
    }
}
