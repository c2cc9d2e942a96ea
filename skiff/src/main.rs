//! Skiff - custom Lambda runtime client
//!
//! Resolves a handler from the built-in registry, then polls the Runtime
//! API for invocations until the process is stopped externally.

use std::sync::Arc;

use clap::Parser;
use serde_json::{json, Value};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use skiff_runtime::{
    Context, ErrorReport, FnHandler, HandlerError, HandlerRegistry, RuntimeClient, RuntimeEnv,
};

#[derive(Parser, Debug)]
#[command(name = "skiff")]
#[command(about = "Custom Lambda runtime client", long_about = None)]
struct Args {
    /// Handler export name to resolve from the registry
    #[arg(long, default_value = "handler", env = "_HANDLER")]
    handler: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "SKIFF_LOG_LEVEL")]
    log_level: String,
}

/// Handlers shipped with the binary
///
/// Embedding programs build their own registry; these exist so the process
/// is runnable end-to-end against any Runtime API emulator.
fn builtin_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();

    registry.register(
        "echo",
        Arc::new(FnHandler::new(|event: Value, _ctx: Context| async move {
            Ok::<_, HandlerError>(event)
        })),
    );

    registry.register(
        "default",
        Arc::new(FnHandler::new(|event: Value, ctx: Context| async move {
            Ok::<_, HandlerError>(json!({
                "event": event,
                "requestId": ctx.request_id,
                "functionName": ctx.function_name,
                "remainingTimeMs": ctx.remaining_time_in_millis(),
            }))
        })),
    );

    registry
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("skiff={}", args.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let base_url = RuntimeEnv::runtime_api_base()?;
    let env = RuntimeEnv::from_env();

    info!(handler = %args.handler, function = %env.function_name, "Starting skiff runtime");

    let handler = match builtin_registry().resolve(&args.handler) {
        Ok(handler) => handler,
        Err(err) => {
            // Fatal: no handler exists to serve any future invocation.
            error!(error = %err, "Handler resolution failed");
            let report = ErrorReport::from(&err);
            if let Err(post_err) = RuntimeClient::report_init_error(&base_url, &report).await {
                error!(error = %post_err, "Failed to post init error");
            }
            std::process::exit(1);
        }
    };

    let client = RuntimeClient::new(base_url, handler, env);
    client.run(None).await;

    Ok(())
}
