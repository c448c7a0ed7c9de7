use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use sim_agent::{PersonaServices, Population, World};
use sim_config::SimConfig;
use sim_core::{ActionLog, Result, TracingActionLog};
use sim_engine::{RunningSimulation, SimulationBuilder};
use sim_llm::{ChatProvider, EmbeddingProvider, OpenAiChat, OpenAiEmbedding, TimeoutChat};
use sim_memory::{InMemoryStream, MemoryStream, SqliteStore};

/// How often the host checks the error channel.
const SUPERVISION_PERIOD: Duration = Duration::from_secs(1);

pub(super) async fn cmd_run(config: SimConfig, ticks: Option<u64>) -> Result<()> {
    println!("simulacra v{}", env!("CARGO_PKG_VERSION"));
    println!("   Model: {}", config.services.chat_model);
    println!("   Start: {}", config.clock.start);
    println!("   Agents: {}", config.population.len());
    println!();

    if config.population.is_empty() {
        warn!("population is empty; the clock will run with nobody in town");
    }

    let (memory, actions) = open_storage(&config)?;
    let population = Population::new(PersonaServices::new(
        &config,
        chat_provider(&config),
        embedding_provider(&config),
        memory,
    ));
    let builder = SimulationBuilder::new(&config, population.dialogue()).with_action_log(actions);
    let world = World::new(&builder);
    population.spawn(&config.population, &world).await?;

    let running = builder.build().start(ticks);
    let outcome = supervise(&running).await;
    let summary = running.shutdown().await?;
    println!("{summary}");
    outcome
}

fn chat_provider(config: &SimConfig) -> Arc<dyn ChatProvider> {
    let services = &config.services;
    let client = OpenAiChat::new(services.api_key.clone()).with_base_url(&services.base_url);
    Arc::new(TimeoutChat::new(
        client,
        Duration::from_secs(services.request_timeout_secs),
    ))
}

fn embedding_provider(config: &SimConfig) -> Arc<dyn EmbeddingProvider> {
    let services = &config.services;
    Arc::new(
        OpenAiEmbedding::new(services.api_key.clone())
            .with_model(&services.embedding_model, services.embedding_dims)
            .with_base_url(&services.base_url),
    )
}

/// SQLite when a database path is configured, otherwise process memory and the log.
fn open_storage(config: &SimConfig) -> Result<(Arc<dyn MemoryStream>, Arc<dyn ActionLog>)> {
    match &config.memory.db_path {
        Some(path) => {
            let store = SqliteStore::open(path)?;
            info!(path = %path.display(), run_id = %store.run_id(), "using SQLite memory store");
            Ok((Arc::new(store.clone()), Arc::new(store)))
        }
        None => {
            info!("using in-process memory store");
            Ok((Arc::new(InMemoryStream::new()), Arc::new(TracingActionLog)))
        }
    }
}

/// Watch the run until Ctrl-C, the tick limit, or an error surfaces.
async fn supervise(running: &RunningSimulation) -> Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut poll = tokio::time::interval(SUPERVISION_PERIOD);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted, shutting down");
                return Ok(());
            }
            _ = poll.tick() => {
                if let Some(e) = running.handle().poll_error() {
                    error!(error = %e, "simulation error, shutting down");
                    return Err(e);
                }
                if running.is_finished() {
                    info!("tick limit reached");
                    return Ok(());
                }
            }
        }
    }
}
