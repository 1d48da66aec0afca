#[tokio::main]
async fn main() -> anyhow::Result<()> {
    formpilot::cli::app::run().await
}
