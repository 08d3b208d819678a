pub mod api;
pub mod collectors;
pub mod config;
pub mod digest;
pub mod dispatcher;
pub mod fetcher;
pub mod llm;
pub mod parser;
pub mod processing;
pub mod scheduler;
pub mod stats;
pub mod store;
pub mod summarizer;
pub mod types;
pub mod utils;

pub use api::{router, AppState};
pub use collectors::{Collector, CollectorRegistry};
pub use config::AppConfig;
pub use digest::DigestGenerator;
pub use dispatcher::CollectorDispatcher;
pub use fetcher::Fetcher;
pub use llm::LlmProviderRegistry;
pub use processing::ProcessingScheduler;
pub use stats::StatsService;
pub use store::{MemoryStore, PgStore, Store};
pub use summarizer::Summarizer;
pub use types::*;
