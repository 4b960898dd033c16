#[tokio::main]
async fn main() -> anyhow::Result<()> {
    lib_replica_sim::init().await
}
