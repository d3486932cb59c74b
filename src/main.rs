#[tokio::main]
async fn main() -> anyhow::Result<()> {
    openalgo_livefeed::run().await
}
