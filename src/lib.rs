pub mod commands;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod state;

pub use commands::classify_commands::{
    check_api_key, get_classification_status, get_classification_view, migrate_files,
    migrate_task, start_classification, ApiKeyCheck, ClassificationView, StatusPoller,
    TaskSnapshot,
};
pub use config::ClassifierConfig;
pub use error::AppError;
pub use services::classifier_service::{ChatCompletionClient, ClassificationClient};
pub use services::progress_service::format_duration;
pub use state::AppState;

const DEFAULT_LOG_FILTER: &str = "warn,para_classifier=info,para_classifier_lib=info";

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the default
/// filter. Calling this more than once is harmless.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
