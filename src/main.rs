use simulation::{simulate_board, simulate_scaling};
use tracing_subscriber::EnvFilter;
pub mod simulation;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("failed to start runtime: {err}");
            std::process::exit(1);
        }
    };
    if let Err(err) = rt.block_on(async_main()) {
        eprintln!("simulation failed: {err}");
        std::process::exit(1);
    }
}

async fn async_main() -> Result<(), arbor_sdk::SdkError> {
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            REPLICA GOSSIP SIMULATIONS                      ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    // Few replicas, heavy contention on a small board
    let stats = simulate_board(4, 50, 100, 8).await?;
    stats.print();

    // More replicas, larger board
    let stats = simulate_board(10, 100, 300, 64).await?;
    stats.print();

    simulate_scaling(20, 5).await?;

    println!("\n✓ All simulations completed");
    Ok(())
}
