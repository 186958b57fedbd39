use anyhow::Context;
use deepcite::{
    AppState, DeepciteConfig, DeepciteConfigManager, ResearchController, RunOutcome,
    cli::{Cli, Commands, output::Output},
    research::{ControllerOptions, MarkdownRenderer},
    retrieval::build_fetcher,
    types::ResearchRequest,
    utils::toml_config::{LogFormat, ServerConfig},
};
use futures::StreamExt;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse_args();
    let output = if cli.no_color {
        Output::no_color()
    } else {
        Output::new()
    };

    let config_manager = if cli.config.exists() {
        DeepciteConfigManager::new(&cli.config)
            .with_context(|| format!("loading {}", cli.config.display()))?
    } else {
        DeepciteConfigManager::from_config(DeepciteConfig::default())
    };
    let config = config_manager.config();
    init_tracing(&config.server);

    if !cli.config.exists() {
        tracing::warn!(path = %cli.config.display(), "Config file not found, using defaults");
    }

    let controller = build_controller(&config).await?;

    match cli.command {
        Commands::Serve { watch } => {
            if watch && cli.config.exists() {
                config_manager.start_watching()?;
            }
            output.banner();
            serve(Arc::new(config_manager), controller).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run {
            query,
            max_sub_questions,
            max_revisions,
            json_events,
        } => {
            let request = ResearchRequest {
                query,
                max_sub_questions,
                max_revision_iterations: max_revisions,
                per_call_timeout_secs: None,
            };
            // stdout carries only the JSON event lines
            let output = if json_events {
                output.on_stderr()
            } else {
                output
            };
            run_once(&controller, &request, json_events, &output).await
        }
    }
}

fn init_tracing(server: &ServerConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("deepcite={0},tower_http={0}", server.log_level))
    });
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so `deepcite run` output stays pipeable
    match server.log_format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

async fn build_controller(config: &DeepciteConfig) -> anyhow::Result<ResearchController> {
    let provider = config.provider()?;
    tracing::info!(
        provider = provider.name(),
        model = %config.llm.model,
        "Creating text generator"
    );
    let llm = provider.create_client().await?;
    let planner_fallback = match config.fallback_provider()? {
        Some(fallback) => {
            tracing::info!(
                model = ?config.llm.fallback_model,
                "Creating fallback planner model"
            );
            Some(fallback.create_client().await?)
        }
        None => None,
    };
    let fetcher = build_fetcher(&config.retrieval)?;

    Ok(ResearchController::new(
        llm,
        fetcher,
        Arc::new(MarkdownRenderer),
        ControllerOptions {
            defaults: config.research_defaults(),
            event_buffer: config.research.event_buffer,
            planner_fallback,
        },
    ))
}

async fn serve(
    config_manager: Arc<DeepciteConfigManager>,
    controller: ResearchController,
) -> anyhow::Result<()> {
    let config = config_manager.config();
    let watcher = Arc::clone(&config_manager);
    let addr = format!("{}:{}", config.server.host, config.server.port);

    let app = deepcite::api::app(AppState {
        config_manager,
        controller,
    });

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!("DeepCite listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    watcher.stop_watching();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

async fn run_once(
    controller: &ResearchController,
    request: &ResearchRequest,
    json_events: bool,
    output: &Output,
) -> anyhow::Result<ExitCode> {
    let task_id = controller.submit_request(request)?;
    output.info(&format!("research task {task_id}"));

    let mut events = controller.subscribe(task_id)?;
    let mut ctrl_c = std::pin::pin!(tokio::signal::ctrl_c());
    let mut cancel_sent = false;

    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(event) if json_events => println!("{}", serde_json::to_string(&event)?),
                Some(event) => output.event(&event),
                None => break,
            },
            _ = &mut ctrl_c, if !cancel_sent => {
                output.warning("cancelling...");
                controller.cancel(task_id)?;
                cancel_sent = true;
            }
        }
    }

    let outcome = controller.wait(task_id).await?;
    output.outcome(&outcome);

    Ok(match outcome {
        RunOutcome::Completed { .. } => ExitCode::SUCCESS,
        RunOutcome::Cancelled { .. } => ExitCode::from(130),
        RunOutcome::Failed { .. } => ExitCode::FAILURE,
    })
}
