//! tabletalk - ask questions about your CSV files in plain language.

mod cli;
mod logging;

use std::process::ExitCode;

use cli::{Cli, Command};
use serde::Serialize;
use tabletalk::api::{AskRequest, DatasetListRequest};
use tabletalk::config::Config;
use tabletalk::error::{Result, TabletalkError};
use tabletalk::Tabletalk;
use tracing::{debug, error};

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse_args();

    if cli.log_file {
        logging::init_file_logging();
    } else {
        logging::init_stderr_logging();
    }

    match run(cli).await {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}: {}", e.category(), e);
            println!("{}", error_json(&e));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<String> {
    let config_path = cli.config_path();
    debug!("Loading config from: {}", config_path.display());
    let config = Config::load_from_file(&config_path)?;

    let app = Tabletalk::connect(&config, cli.db.as_deref(), cli.llm.as_deref()).await?;
    let output = execute(&app, cli.command).await;
    app.close().await;
    output
}

async fn execute(app: &Tabletalk, command: Command) -> Result<String> {
    match command {
        Command::Upload { file, email } => to_json(&app.upload(&email, &file).await?),
        Command::Datasets { email } => to_json(
            &app.list_datasets(&DatasetListRequest { user_email: email })
                .await?,
        ),
        Command::Ask {
            dataset_id,
            question,
        } => to_json(
            &app.ask(&AskRequest {
                dataset_id,
                query: question.join(" "),
            })
            .await?,
        ),
        Command::Columns { dataset_id } => to_json(&app.columns(&dataset_id).await?),
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| TabletalkError::internal(format!("Failed to serialize output: {e}")))
}

/// The failure document printed on stdout.
fn error_json(e: &TabletalkError) -> serde_json::Value {
    serde_json::json!({
        "error": e.category(),
        "message": e.user_message(),
    })
}
