mod cli;
mod shutdown;

use std::sync::Arc;

use clap::Parser;
use cli::{Cli, Commands};
use packagebug::config::Config;
use packagebug::github::GithubClient;
use packagebug::observability;
use packagebug::queue::{FjallQueue, QueueError};
use packagebug::store::{FjallStore, StoreError};
use packagebug::worker::{Dispatcher, DispatcherConfig, FetchWorker, RateBudget};
use tokio_util::sync::CancellationToken;
use tracing::info;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[tokio::main]
async fn main() -> Result<(), AnyError> {
    observability::init_tracing();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Run => run(config).await?,
        Commands::Enqueue(args) => {
            // A running worker holds the queue; its process never sees writes from this one
            let queue = FjallQueue::open(&config.queue.endpoint).map_err(|e| match e {
                QueueError::Lock(ref lock) if lock.is_held() => worker_running(&e),
                e => e.into(),
            })?;
            let seq = queue.enqueue(&args.message)?;
            queue.flush()?;
            info!(seq, "Message enqueued");
        }
        Commands::Token(args) => {
            let store = FjallStore::open(&config.store.path).map_err(|e| match e {
                StoreError::Lock(ref lock) if lock.is_held() => worker_running(&e),
                e => e.into(),
            })?;
            match args.path {
                Some(path) => println!("{}", store.token(&path)?),
                None => {
                    for (path, token) in store.tokens()? {
                        println!("{}\t{}", path, token);
                    }
                }
            }
        }
    }

    Ok(())
}

fn worker_running(err: &dyn std::error::Error) -> AnyError {
    format!("{}; stop `packagebug run` first", err).into()
}

async fn run(config: Config) -> Result<(), AnyError> {
    // Startup failures are the only fatal errors
    let queue = Arc::new(FjallQueue::open_with_visibility(
        &config.queue.endpoint,
        config.queue.visibility_timeout.as_duration(),
    )?);
    let store = Arc::new(FjallStore::open(&config.store.path)?);
    let api = Arc::new(GithubClient::new(&config.github)?);

    info!(
        queue = %config.queue.endpoint.display(),
        region = config.queue.region.as_deref().unwrap_or("local"),
        github = %config.github.root_endpoint,
        authenticated = config.github.client_id.is_some(),
        "packagebug worker starting"
    );

    let worker = FetchWorker::new(api.clone(), store.clone(), store.clone());
    let mut dispatcher = Dispatcher::new(
        DispatcherConfig::from(&config),
        queue,
        RateBudget::new(api),
        worker,
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown::cancel_on_signal(shutdown.clone()));

    dispatcher.run(shutdown).await;
    store.persist()?;

    Ok(())
}
