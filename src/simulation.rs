use arbor_core::Ed25519Signer;
use arbor_runtime::{ExecutionError, FunctionExecutor, ModelSchema, Property, PropertyType};
use arbor_sdk::{App, AppConfig, MemoryChannel, PeerId, SdkError};
use async_stream::stream;
use futures::stream::{Stream, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const TOPIC: &str = "arbor.simulation.board";

type Replica = Arc<App<FunctionExecutor>>;

/// Statistics collected during a simulation run
#[derive(Clone, Debug)]
pub struct SimulationStats {
    pub num_replicas: usize,
    pub actions_per_replica: usize,
    pub total_syncs: usize,
    pub messages_per_replica: usize,
    pub messages_received: usize,
    pub rejected: usize,
    pub total_time: Duration,
    pub avg_sync_time: Duration,
    pub converged: bool,
}

impl SimulationStats {
    pub fn print(&self) {
        println!("\n╔════════════════════════════════════════════════════════════╗");
        println!("║              Simulation Statistics                         ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║  Number of Replicas:        {:>30} ║", self.num_replicas);
        println!("║  Actions per Replica:       {:>30} ║", self.actions_per_replica);
        println!("║  Total Sync Exchanges:      {:>30} ║", self.total_syncs);
        println!("║  Messages per Replica:      {:>30} ║", self.messages_per_replica);
        println!("║  Messages Transferred:      {:>30} ║", self.messages_received);
        println!("║  Rejected Actions:          {:>30} ║", self.rejected);
        println!("║  Total Time:                {:>29}s ║", format!("{:.3}", self.total_time.as_secs_f64()));
        println!("║  Average Sync Time:         {:>28}µs ║", self.avg_sync_time.as_micros());
        println!("║  Converged:                 {:>30} ║", if self.converged { "yes" } else { "NO" });
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

/// A shared board of cells that every replica paints concurrently.
fn schema() -> ModelSchema {
    ModelSchema::new().mutable(
        "cells",
        "id",
        vec![
            Property::new("color", PropertyType::Integer),
            Property::new("painter", PropertyType::String),
        ],
    )
}

fn executor() -> FunctionExecutor {
    FunctionExecutor::new().action("paint", |db, args, context| {
        let cell = args["cell"]
            .as_u64()
            .ok_or_else(|| ExecutionError::handler("cell must be a number"))?;
        let color = args["color"]
            .as_u64()
            .ok_or_else(|| ExecutionError::handler("color must be a number"))?;
        if color > 255 {
            return Err(ExecutionError::handler("color out of range"));
        }
        db.set(
            "cells",
            json!({"id": format!("cell-{cell}"), "color": color, "painter": context.address}),
        )?;
        Ok(Value::Null)
    })
}

/// Generator that yields replica pairs for gossip exchanges
fn gossip_pairs(num_replicas: usize, num_syncs: usize, seed: u64) -> impl Stream<Item = (usize, usize)> {
    stream! {
        let mut rng = StdRng::seed_from_u64(seed);
        for _ in 0..num_syncs {
            let puller = rng.gen_range(0..num_replicas);
            let source = rng.gen_range(0..num_replicas);
            yield (puller, source);
        }
    }
}

async fn create_replicas(num_replicas: usize) -> Result<Vec<Replica>, SdkError> {
    let config = AppConfig::builder(TOPIC).signatures(true).require_sessions(true).build();
    let mut replicas = Vec::with_capacity(num_replicas);
    for idx in 0..num_replicas {
        let mut secret = [0u8; 32];
        secret[..8].copy_from_slice(&(idx as u64 + 1).to_be_bytes());
        let app = App::in_memory(config.clone(), schema(), executor())
            .await?
            .with_account(Ed25519Signer::from_secret(&secret));
        replicas.push(Arc::new(app));
    }
    Ok(replicas)
}

/// Paint random cells on every replica concurrently, then gossip between
/// random pairs, then run one full pull pass and check convergence.
pub async fn simulate_board(
    num_replicas: usize,
    actions_per_replica: usize,
    num_syncs: usize,
    num_cells: u64,
) -> Result<SimulationStats, SdkError> {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║        Board Simulation                                    ║");
    println!("║  Replicas: {} | Actions/Replica: {} | Syncs: {} ║",
             num_replicas, actions_per_replica, num_syncs);
    println!("╚════════════════════════════════════════════════════════════╝");

    let start = Instant::now();
    let replicas = create_replicas(num_replicas).await?;

    println!("\n[Phase 1/3] Painting cells on every replica...");

    let mut handles = Vec::with_capacity(num_replicas);
    for (idx, replica) in replicas.iter().enumerate() {
        let replica = Arc::clone(replica);
        handles.push(tokio::spawn(async move {
            let mut rng = StdRng::seed_from_u64(idx as u64);
            let mut rejected = 0;
            for i in 0..actions_per_replica {
                // Roughly one in twenty colors is out of range and rejected.
                let color = rng.gen_range(0..270u64);
                let args = json!({"cell": rng.gen_range(0..num_cells), "color": color});
                if let Err(err) = replica.act("paint", args).await {
                    warn!(replica = idx, action = i, error = %err, "paint rejected");
                    rejected += 1;
                }
                if i % 50 == 0 {
                    tokio::task::yield_now().await;
                }
            }
            rejected
        }));
    }
    let mut rejected = 0;
    for handle in handles {
        rejected += handle.await.unwrap_or(0);
    }

    println!("[Phase 1/3] ✓ Completed");
    println!("[Phase 2/3] Gossiping between random pairs...");

    let mut servers = Vec::with_capacity(num_replicas);
    let mut channels: Vec<MemoryChannel> = Vec::with_capacity(num_replicas);
    for (idx, replica) in replicas.iter().enumerate() {
        let (channel, server) = replica.serve(PeerId::new(format!("replica-{idx}")));
        channels.push(channel.with_wire_encoding(true));
        servers.push(server);
    }

    let mut sync_times = Vec::new();
    let mut received = 0;
    let mut pairs = Box::pin(gossip_pairs(num_replicas, num_syncs, 42));
    while let Some((puller, source)) = pairs.next().await {
        if puller == source {
            continue;
        }
        let sync_start = Instant::now();
        let report = replicas[puller].sync_with(&channels[source]).await?;
        sync_times.push(sync_start.elapsed());
        received += report.received;

        if sync_times.len() % 100 == 0 {
            println!("  Syncs completed: {}/{}", sync_times.len(), num_syncs);
        }
    }

    println!("[Phase 2/3] ✓ Completed");
    println!("[Phase 3/3] Final pull pass...");

    for (idx, replica) in replicas.iter().enumerate() {
        for (source, channel) in channels.iter().enumerate() {
            if source != idx {
                received += replica.sync_with(channel).await?.received;
            }
        }
    }
    for server in &servers {
        server.abort();
    }

    let reference = replicas[0].entries("cells")?;
    let root = replicas[0].stats().root;
    let mut converged = true;
    for replica in &replicas {
        converged &= replica.stats().root == root && replica.entries("cells")? == reference;
    }
    info!(replicas = num_replicas, converged, cells = reference.len(), "simulation finished");

    println!("[Phase 3/3] ✓ Completed");

    let avg_sync_time = if sync_times.is_empty() {
        Duration::ZERO
    } else {
        sync_times.iter().sum::<Duration>() / sync_times.len() as u32
    };

    Ok(SimulationStats {
        num_replicas,
        actions_per_replica,
        total_syncs: sync_times.len(),
        messages_per_replica: replicas[0].stats().messages,
        messages_received: received,
        rejected,
        total_time: start.elapsed(),
        avg_sync_time,
        converged,
    })
}

/// Run the board simulation over growing replica counts
pub async fn simulate_scaling(max_replicas: usize, step_size: usize) -> Result<(), SdkError> {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║      Scaling Analysis - Convergence vs Replicas            ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    let mut current_replicas = step_size;
    while current_replicas <= max_replicas {
        let stats = simulate_board(current_replicas, 20, current_replicas * 10, 16).await?;
        stats.print();
        current_replicas += step_size;
    }
    Ok(())
}
