use tracing::{Instrument, trace_span};
use tracing_subscriber::{
    EnvFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

use pgconv::{Result, SerializerOptions};

mod values;
mod row;
mod blocking;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::Registry::default()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let options = SerializerOptions::from_env()?;
    tracing::info!(encoding = ?options.encoding(), "options loaded");

    values::main().instrument(trace_span!("values")).await?;
    row::main(&options).instrument(trace_span!("row")).await?;
    blocking::main(&options)?;

    Ok(())
}
