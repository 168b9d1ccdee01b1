#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = picrete_attempt::run().await {
        eprintln!("picrete-attempt fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
