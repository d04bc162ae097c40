use tracing_subscriber::EnvFilter;
use traffic_review::cli::{CliArgs, CliSources, parse_cli};
use traffic_review::console::Console;
use traffic_review::error::AppError;
use traffic_review::playback::PlaybackController;
use traffic_review::settings::{DEFAULT_LOG_FILTER, LoggingSettings, resolve_settings};
use traffic_review_client::Backend;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), AppError> {
    let (cli_args, cli_sources): (CliArgs, CliSources) = parse_cli();

    if cli_args.list_backends {
        display_available_backends();
        return Ok(());
    }

    let resolved = resolve_settings(&cli_args, &cli_sources)?;
    let settings = resolved.settings;
    init_tracing(&settings.logging)?;
    if let Some(path) = resolved.config_path.as_ref() {
        tracing::info!(path = %path.display(), "loaded config");
    }

    let service = settings.client_configuration().create_service()?;
    tracing::info!(
        backend = %settings.service.backend,
        url = %settings.service.url,
        "detection service ready"
    );

    let controller = PlaybackController::new(service, settings.playback);
    let health = controller.connect().await;
    if let Some(source) = cli_args.source {
        let already_running = health.is_some_and(|health| health.detecting);
        if already_running {
            tracing::info!(%source, "service is already detecting; not restarting");
        } else {
            controller.start_detection(source).await;
        }
    }

    Console::new(controller).run().await
}

fn init_tracing(logging: &LoggingSettings) -> Result<(), AppError> {
    let filter = match logging.filter.as_deref() {
        Some(directives) => {
            EnvFilter::try_new(directives).map_err(|err| AppError::LogFilter {
                filter: directives.to_string(),
                message: err.to_string(),
            })?
        }
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
    Ok(())
}

fn display_available_backends() {
    println!("available service backends:");
    for backend in Backend::available() {
        let marker = if backend == Backend::default() {
            " (default)"
        } else {
            ""
        };
        println!("  {}{marker}", backend.as_str());
    }
}
