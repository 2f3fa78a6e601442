use std::sync::Arc;

use inpaint_service::api::server::serve;
use inpaint_service::config::ServiceConfig;
use inpaint_service::model::catalog::find_model;
use inpaint_service::model::remote::{RemoteModelConfig, RemoteModelLoader};
use inpaint_service::model::ModelHandle;
use serde_json::{json, Value};
use tracing::level_filters::LevelFilter;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Serve,
    PrintConfig,
    ProbeModel,
    Help,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let cli_args = std::env::args().skip(1).collect::<Vec<_>>();
    let command = parse_command(&cli_args)?;
    if command == Command::Help {
        print_usage();
        return Ok(());
    }

    let config = ServiceConfig::from_env()?;
    match command {
        Command::PrintConfig => {
            println!("{}", serde_json::to_string_pretty(&config_summary(&config))?);
        }
        Command::ProbeModel => run_probe_model_cli(config).await?,
        Command::Serve | Command::Help => {
            if find_model(config.model_id.as_str()).is_none() {
                warn!(model = %config.model_id, "MODEL_ID is not one of the listed checkpoints");
            }
            serve(config).await?;
        }
    }
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init();
}

fn parse_command(args: &[String]) -> Result<Command, Box<dyn std::error::Error>> {
    let command = match args.first().map(String::as_str) {
        None | Some("serve") => Command::Serve,
        Some("print-config") => Command::PrintConfig,
        Some("probe-model") => Command::ProbeModel,
        Some("-h" | "--help" | "help") => return Ok(Command::Help),
        Some(unknown) => {
            return Err(std::io::Error::other(format!(
                "Unknown command: {unknown}\n\nUse --help for usage."
            ))
            .into());
        }
    };
    if args
        .iter()
        .skip(1)
        .any(|arg| matches!(arg.as_str(), "-h" | "--help"))
    {
        return Ok(Command::Help);
    }
    if let Some(extra) = args.get(1) {
        return Err(std::io::Error::other(format!(
            "Unexpected argument: {extra}\n\nUse --help for usage."
        ))
        .into());
    }
    Ok(command)
}

fn config_summary(config: &ServiceConfig) -> Value {
    json!({
        "model_id": config.model_id,
        "device": config.device.as_str(),
        "precision": config.device.precision().map(|p| p.as_str()),
        "bind": config.bind_display(),
        "cors_origin": config.cors_origin.as_str(),
        "model_endpoint": config.model_endpoint.as_ref().map(|url| url.as_str()),
        "model_timeout_secs": config.model_timeout.as_secs(),
        "serialize_inference": config.serialize_inference,
        "body_limit_bytes": config.body_limit_bytes,
    })
}

async fn run_probe_model_cli(config: ServiceConfig) -> Result<(), Box<dyn std::error::Error>> {
    let handle = ModelHandle::new(Arc::new(RemoteModelLoader::new(
        RemoteModelConfig::from_service_config(&config),
    )));
    let (model_id, outcome) = tokio::task::spawn_blocking(move || {
        let outcome = handle
            .get_or_load()
            .map(|model| model.device().as_str().to_string());
        (handle.model_id().to_string(), outcome)
    })
    .await?;

    match outcome {
        Ok(device) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "ok": true,
                    "model": model_id,
                    "device": device,
                }))?
            );
            Ok(())
        }
        Err(err) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "ok": false,
                    "model": model_id,
                    "error": err.to_string(),
                }))?
            );
            Err(err.into())
        }
    }
}

fn print_usage() {
    eprintln!(concat!(
        "Usage:\n",
        "  inpaint-service [serve]        start the HTTP service\n",
        "  inpaint-service print-config   print the resolved configuration as JSON\n",
        "  inpaint-service probe-model    load the configured model once and report\n\n",
        "Environment:\n",
        "  MODEL_ID, DEVICE, HOST, PORT, CORS_ORIGIN,\n",
        "  INPAINT_MODEL_ENDPOINT, INPAINT_MODEL_TIMEOUT_SECS,\n",
        "  INPAINT_SERIALIZE_INFERENCE, INPAINT_BODY_LIMIT_BYTES, RUST_LOG\n"
    ));
}
