use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tech_intel::{
    api, scheduler, AppConfig, CheckFrequency, CollectorDispatcher, CollectorRegistry, DigestGenerator, Fetcher,
    LlmProviderRegistry, MemoryStore, PgStore, ProcessingScheduler, StatsService, Store, Summarizer,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "tech-intel", about = "Collects, summarizes and publishes tech news digests")]
struct Cli {
    /// Keep everything in memory instead of Postgres.
    #[arg(long, global = true)]
    in_memory: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// HTTP API plus the background schedules.
    Serve,
    /// Run collectors once.
    Collect {
        #[arg(long)]
        source: Option<Uuid>,
        #[arg(long)]
        frequency: Option<CheckFrequency>,
    },
    /// Summarize unprocessed items once.
    Process {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Generate the digest for a date (today by default).
    Digest {
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        publish: bool,
    },
    /// Apply database migrations and exit.
    Migrate,
}

struct Services {
    store: Arc<dyn Store>,
    dispatcher: Arc<CollectorDispatcher>,
    processing: Arc<ProcessingScheduler>,
    digests: Arc<DigestGenerator>,
    llm: Arc<LlmProviderRegistry>,
}

async fn open_store(config: &AppConfig, in_memory: bool) -> anyhow::Result<Arc<dyn Store>> {
    if in_memory {
        warn!("Using the in-memory store; nothing survives a restart");
        return Ok(Arc::new(MemoryStore::new()));
    }

    info!("Connecting to database: {}", config.masked_database_url());
    let store = PgStore::connect(&config.database_url)
        .await
        .with_context(|| format!("connecting to {}", config.masked_database_url()))?;
    store.migrate().await.context("applying migrations")?;
    Ok(Arc::new(store))
}

async fn build_services(config: &AppConfig, store: Arc<dyn Store>) -> anyhow::Result<Services> {
    let fetcher = Arc::new(Fetcher::new(config.fetch.clone())?);
    let collectors = CollectorRegistry::with_defaults(fetcher, config.github_token.clone(), config.reddit.clone());
    info!("Collectors ready for: {:?}", collectors.supported_types());

    let llm = Arc::new(LlmProviderRegistry::from_settings(&config.llm, &config.fetch, store.clone()).await?);
    let summarizer = Arc::new(Summarizer::new(llm.clone(), store.clone()));

    Ok(Services {
        dispatcher: Arc::new(CollectorDispatcher::new(collectors, store.clone())),
        processing: Arc::new(ProcessingScheduler::new(summarizer, config.processing_batch_size)),
        digests: Arc::new(DigestGenerator::new(store.clone())),
        llm,
        store,
    })
}

async fn serve(config: &AppConfig, services: Services) -> anyhow::Result<()> {
    let interval = Duration::from_secs(config.processing_interval_minutes.max(1) * 60);
    let _jobs = scheduler::spawn_all(
        services.dispatcher.clone(),
        services.processing.clone(),
        services.digests.clone(),
        interval,
    );

    let state = api::AppState {
        stats: Arc::new(StatsService::new(services.store.clone())),
        store: services.store,
        dispatcher: services.dispatcher,
        processing: services.processing,
        digests: services.digests,
        llm: services.llm,
    };
    let app = api::router(state, config.blog_url.as_deref());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("API listening on http://{}/api", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;
    let store = open_store(&config, cli.in_memory).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Migrate => {
            info!("Migrations are up to date");
        }
        Command::Serve => {
            let services = build_services(&config, store).await?;
            serve(&config, services).await?;
        }
        Command::Collect { source, frequency } => {
            let services = build_services(&config, store).await?;
            let reports = match (source, frequency) {
                (Some(id), _) => {
                    let result = services.dispatcher.trigger_source(id).await?;
                    info!("{}", result.message);
                    return Ok(());
                }
                (None, Some(frequency)) => services.dispatcher.run_bucket(frequency).await?,
                (None, None) => services.dispatcher.trigger_all().await?,
            };
            for report in reports {
                match report.error {
                    None => info!("{}: {} new items", report.name, report.new_items),
                    Some(e) => error!("{}: {}", report.name, e),
                }
            }
        }
        Command::Process { limit } => {
            let services = build_services(&config, store).await?;
            let processed = services.processing.trigger(limit).await?;
            info!("Processed {} items", processed);
        }
        Command::Digest { date, publish } => {
            let services = build_services(&config, store).await?;
            let date = date.unwrap_or_else(|| Utc::now().date_naive());
            match services.digests.generate_for_date(date).await? {
                Some(digest) if publish => {
                    let digest = services.digests.publish(digest.id).await?;
                    info!("Published digest {} for {}", digest.id, digest.date);
                }
                Some(digest) => {
                    info!("Digest {} for {} is {}", digest.id, digest.date, digest.status);
                    println!("{}", digest.content);
                }
                None => info!("Nothing qualified for a digest on {}", date),
            }
        }
    }

    Ok(())
}
