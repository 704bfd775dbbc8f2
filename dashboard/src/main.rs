mod dispatcher;
mod host;
mod ingest;
mod settings;
mod transport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
