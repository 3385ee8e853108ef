//! # Lobby Soak Run
//!
//! Hosts a loopback lobby with several guests on an average home network and
//! reports how well replicas follow their owners.
//!
//! Usage: `lobby_soak [guests] [seconds]`

use std::time::Instant;

use wingmate_net::simulation::{SimulationConfig, SoakSimulation};
use wingmate_net::NetworkConditions;

fn main() {
    let mut args = std::env::args().skip(1);
    let defaults = SimulationConfig::default();
    let guest_count = args.next().and_then(|a| a.parse().ok()).unwrap_or(defaults.guest_count);
    let duration_secs = args.next().and_then(|a| a.parse().ok()).unwrap_or(defaults.duration_secs);

    let config = SimulationConfig {
        guest_count,
        duration_secs,
        network: NetworkConditions::AVERAGE,
        ..defaults
    };

    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║         WINGMATE - LOBBY SOAK RUN                                ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();

    println!("┌─ CONFIGURATION ─────────────────────────────────────────────────┐");
    println!("│ Peers:              {} (host + {} guests)", config.guest_count + 1, config.guest_count);
    println!("│ Enemies per peer:   {}", config.enemies_per_peer);
    println!("│ Tick Rate:          {} Hz", config.tick_rate);
    println!("│ Duration:           {} seconds", config.duration_secs);
    println!("│ Packet Loss:        {}%", config.network.packet_loss_percent);
    println!("│ Duplicates:         {}%", config.network.duplicate_percent);
    println!("│ Reordering:         {}%", config.network.out_of_order_percent);
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    let start = Instant::now();
    let mut simulation = match SoakSimulation::new(config.clone()) {
        Ok(simulation) => simulation,
        Err(err) => {
            eprintln!("Failed to set up the lobby: {err}");
            std::process::exit(1);
        }
    };

    let total_ticks = simulation.total_ticks().max(1);
    let mut last_progress = 0;
    while simulation.tick() {
        let progress = simulation.current_tick() * 100 / total_ticks;
        if progress > last_progress && progress % 10 == 0 {
            let filled = usize::try_from(progress / 10).unwrap_or(10);
            print!("\r[{}{}] {}% - Tick {}/{}", "█".repeat(filled), "░".repeat(10 - filled.min(10)), progress, simulation.current_tick(), total_ticks);
            last_progress = progress;
        }
    }
    println!();
    println!();

    let elapsed = start.elapsed();
    let stats = simulation.stats();

    println!("┌─ TIMING ────────────────────────────────────────────────────────┐");
    println!("│ Real Time:          {:.2} seconds", elapsed.as_secs_f64());
    println!("│ Total Ticks:        {}", stats.total_ticks);
    println!("│ Avg Tick (all peers): {} μs", stats.avg_tick_us);
    println!("│ Max Tick (all peers): {} μs", stats.max_tick_us);
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    println!("┌─ NETWORK ───────────────────────────────────────────────────────┐");
    println!("│ Frames Sent:        {}", stats.frames_sent);
    println!("│ Frames Dropped:     {}", stats.frames_dropped);
    println!("│ Stale Snapshots:    {}", stats.stale_snapshots);
    println!("│ Coalesced:          {}", stats.coalesced_snapshots);
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    println!("┌─ REPLICATION ───────────────────────────────────────────────────┐");
    println!("│ Entities:           {}", stats.entities);
    println!("│ Avg Replica Error:  {:.4} units", stats.avg_replica_error);
    println!("│ Max Replica Error:  {:.4} units", stats.max_replica_error);
    println!("│ Samples:            {}", stats.error_samples);
    println!("│ Missing Replicas:   {}", stats.missing_replicas);
    println!("│ Double Ownership:   {}", stats.ownership_violations);
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    let consistent = stats.ownership_violations == 0 && stats.missing_replicas == 0;
    println!("╔══════════════════════════════════════════════════════════════════╗");
    if consistent {
        println!("║  ✓ Every peer agreed on every entity and its owner               ║");
    } else {
        println!("║  ✗ Peers disagreed about entities or owners                      ║");
    }
    println!("╚══════════════════════════════════════════════════════════════════╝");

    if !consistent {
        std::process::exit(1);
    }
}
