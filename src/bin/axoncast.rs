use axoncast::{init_logging, AxonNodeBuilder, NodeConfig};
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = NodeConfig::from_env()?;
    init_logging(&config.log)?;

    let node = Arc::new(AxonNodeBuilder::new().with_config(config).build());
    info!(
        correlation_id = %node.correlation_id().short(),
        version = env!("CARGO_PKG_VERSION"),
        "axoncast starting"
    );

    node.run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await?;
    Ok(())
}
