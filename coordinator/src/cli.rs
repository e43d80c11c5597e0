use clap::{Parser, Subcommand};

use crate::registry::NodeEntry;

#[derive(Parser, Debug)]
#[command(name = "coordinator", about = "Cluster control plane for the load-generation fleet")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Register a new node.
    Add {
        name: String,
        host: String,
        user: String,
        key: String,
        conf_dir: String,
        bin_dir: String,
        description: Option<String>,
        #[arg(default_value_t = true)]
        enabled: bool,
    },
    /// Remove a node by name.
    Remove { name: String },
    /// Re-enable a disabled node.
    Enable { name: String },
    /// Disable a node without removing it.
    Disable { name: String },
    /// List every node.
    List,
    /// List only enabled nodes.
    ListEnabled,
    /// Start the HTTP API server (also the default with no sub-command).
    Web,
}

impl Command {
    /// Operates directly on the registry without starting the server.
    /// Returns `Ok(summary)` on success; the caller prints it and exits 0.
    pub fn run_against_registry(&self, registry: &crate::registry::NodeRegistry) -> crate::error::Result<String> {
        match self {
            Command::Add {
                name,
                host,
                user,
                key,
                conf_dir,
                bin_dir,
                description,
                enabled,
            } => {
                let entry = NodeEntry {
                    name: name.clone(),
                    host: host.clone(),
                    user: user.clone(),
                    key_path: key.clone(),
                    remote_config_dir: conf_dir.clone(),
                    remote_bin_dir: bin_dir.clone(),
                    metrics_agent_port: 9100,
                    description: description.clone().unwrap_or_default(),
                    enabled: *enabled,
                };
                registry.add(entry)?;
                Ok(format!("node '{name}' added"))
            }
            Command::Remove { name } => {
                registry.remove(name)?;
                Ok(format!("node '{name}' removed"))
            }
            Command::Enable { name } => {
                registry.enable(name)?;
                Ok(format!("node '{name}' enabled"))
            }
            Command::Disable { name } => {
                registry.disable(name)?;
                Ok(format!("node '{name}' disabled"))
            }
            Command::List => {
                let names: Vec<String> = registry.list().into_iter().map(|n| n.name).collect();
                Ok(names.join("\n"))
            }
            Command::ListEnabled => {
                let names: Vec<String> =
                    registry.list_enabled().into_iter().map(|n| n.name).collect();
                Ok(names.join("\n"))
            }
            Command::Web => Ok(String::new()),
        }
    }

    pub fn is_web(&self) -> bool {
        matches!(self, Command::Web)
    }
}
