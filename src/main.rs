use circleci_provider::{init_logging, serve, CircleciProvider, ProviderError};

#[tokio::main]
async fn main() -> Result<(), ProviderError> {
    init_logging();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting CircleCI provider");
    serve(CircleciProvider::new(env!("CARGO_PKG_VERSION"))).await
}
