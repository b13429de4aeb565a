use std::sync::Arc;

use senseye::node::{MockupReader, NodeAgent, listen_addr};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

fn init() {
    dotenv::dotenv().ok();

    let filter = filter::Targets::new().with_targets(vec![
        ("senseye", LevelFilter::DEBUG),
        ("senseye_node", LevelFilter::DEBUG),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();

    let agent = NodeAgent::bind(listen_addr(), Arc::new(MockupReader)).await?;

    agent.run().await;

    Ok(())
}
