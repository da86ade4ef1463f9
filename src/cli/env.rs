//! Environment CLI subcommands.

use anyhow::Result;
use clap::Subcommand;

use super::App;
use crate::domain::EnvironmentId;

#[derive(Subcommand, Debug)]
pub enum EnvCommands {
    /// List the tenant's environments
    List,

    /// Show the variables of an environment
    Vars {
        /// dev, qa, uat or prod
        env: EnvironmentId,

        /// Print secret values instead of the mask
        #[arg(long)]
        reveal: bool,
    },

    /// Set a variable
    Set {
        env: EnvironmentId,
        key: String,
        value: String,

        /// Mask the value when listing
        #[arg(long)]
        secret: bool,

        #[arg(short, long)]
        description: Option<String>,
    },

    /// Remove a variable
    Unset { env: EnvironmentId, key: String },

    /// Lock an environment against variable changes
    Lock { env: EnvironmentId },

    /// Unlock an environment
    Unlock { env: EnvironmentId },
}

pub fn execute(app: &App, tenant: &str, actor: &str, command: EnvCommands) -> Result<()> {
    let registry = &app.registry;

    match command {
        EnvCommands::List => {
            println!("{:<6} {:<14} {:<6} {:<8} {:<20}", "ENV", "LABEL", "VARS", "LOCKED", "LOCKED BY");
            println!("{}", "-".repeat(60));
            for env in registry.list_environments(tenant) {
                println!(
                    "{:<6} {:<14} {:<6} {:<8} {:<20}",
                    env.environment,
                    env.label,
                    env.variables.len(),
                    if env.is_locked { "yes" } else { "no" },
                    env.locked_by.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
        EnvCommands::Vars { env, reveal } => {
            let vars = registry.get_variables(tenant, env, reveal);
            if vars.is_empty() {
                println!("No variables in {}", env);
                return Ok(());
            }

            println!("{:<30} {:<30} {:<7} {:<16}", "KEY", "VALUE", "SECRET", "UPDATED BY");
            println!("{}", "-".repeat(86));
            for (key, var) in vars {
                println!(
                    "{:<30} {:<30} {:<7} {:<16}",
                    key,
                    var.value,
                    if var.is_secret { "yes" } else { "no" },
                    var.updated_by
                );
            }
            Ok(())
        }
        EnvCommands::Set {
            env,
            key,
            value,
            secret,
            description,
        } => {
            if registry
                .set_variable(tenant, env, &key, &value, secret, description, actor)
                .is_none()
            {
                anyhow::bail!("Environment {} is locked", env);
            }
            println!("Set {} in {}", key, env);
            Ok(())
        }
        EnvCommands::Unset { env, key } => {
            if !registry.delete_variable(tenant, env, &key) {
                anyhow::bail!("Variable {} not removed from {} (missing or environment locked)", key, env);
            }
            println!("Removed {} from {}", key, env);
            Ok(())
        }
        EnvCommands::Lock { env } => {
            registry.lock_environment(tenant, env, actor);
            println!("Locked {} (by {})", env, actor);
            Ok(())
        }
        EnvCommands::Unlock { env } => {
            registry.unlock_environment(tenant, env);
            println!("Unlocked {}", env);
            Ok(())
        }
    }
}
