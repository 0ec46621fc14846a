#[tokio::main]
async fn main() -> anyhow::Result<()> {
    coll_db_rust::run_server().await
}
