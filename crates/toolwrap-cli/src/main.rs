use clap::Parser;
use color_eyre::Result;
use serde_json::json;
use toolwrap_core::{run_bootstrap, BootstrapConfig, EnvSnapshot, SystemEffects};
use tracing::{error, info};

mod cli;
mod logging;

use cli::ToolwrapCli;

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = ToolwrapCli::parse();
    let cwd = std::env::current_dir()?;
    let config = BootstrapConfig::from_options(cli.options(), &EnvSnapshot::capture(), &cwd);

    let log_file = match logging::open_log_file(&config) {
        Ok(file) => file,
        Err(err) => {
            eprintln!(
                "toolwrap: cannot open log file {}: {err}",
                config.log_file().display()
            );
            None
        }
    };
    logging::init_tracing(cli.verbose, config.dry_run, cli.json, log_file);
    info!("logging initialized");

    let effects = SystemEffects::new();
    let code = match run_bootstrap(&config, &effects) {
        Ok(summary) => {
            summary.log_report();
            let result = summary.ensure_success();
            match &result {
                Ok(()) => info!("bootstrap completed successfully"),
                Err(err) => error!("{err}; review the log above"),
            }
            if cli.json {
                let status = if result.is_ok() { "ok" } else { "error" };
                let payload = json!({
                    "status": status,
                    "message": result.as_ref().err().map(ToString::to_string),
                    "summary": summary,
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            }
            i32::from(result.is_err())
        }
        Err(err) => {
            error!("critical error: {err}");
            if cli.json {
                let payload = json!({
                    "status": "error",
                    "message": err.to_string(),
                    "summary": null,
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            }
            1
        }
    };

    if code == 0 {
        Ok(())
    } else {
        std::process::exit(code);
    }
}
