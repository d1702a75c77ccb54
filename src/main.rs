use std::time::Duration;

use anyhow::{anyhow, ensure, Result};
use clap::Parser;
use log::info;

use traffic_priority::simulation::{SimConfig, Simulation, SimulationOptions};

#[derive(Parser)]
#[command(name = "traffic_priority")]
#[command(about = "Headless traffic signal simulation with priority vehicle preemption")]
struct Cli {
    /// Simulated run time in seconds
    #[arg(long, default_value = "10")]
    seconds: f32,

    /// Seed for the emergency vehicle spawner
    #[arg(long)]
    seed: Option<u64>,

    /// Number of ordinary vehicles on the loop
    #[arg(long, default_value = "4")]
    cars: usize,

    /// Green phase duration in seconds
    #[arg(long, default_value = "4.0")]
    green: f32,

    /// Yellow phase duration in seconds
    #[arg(long, default_value = "1.3")]
    yellow: f32,

    /// Preemption override duration in seconds
    #[arg(long, default_value = "6.0")]
    preempt: f32,

    /// Start with the global priority mode on
    #[arg(long)]
    priority_mode: bool,

    /// Toggle the global priority mode every N seconds
    #[arg(long)]
    toggle_priority_every: Option<f32>,

    /// HUD refresh period in seconds; 0 disables the HUD
    #[arg(long, default_value = "1.0")]
    refresh: f32,

    /// Do not spawn transient emergency vehicles
    #[arg(long)]
    no_spawn: bool,

    /// Print the ASCII map with the final summary
    #[arg(long)]
    map: bool,
}

fn seconds(name: &str, value: f32) -> Result<Duration> {
    ensure!(
        value.is_finite() && value >= 0.0,
        "--{} must be a non-negative number of seconds, got {}",
        name,
        value
    );
    Duration::try_from_secs_f32(value)
        .map_err(|e| anyhow!("--{} is out of range ({}), got {}", name, e, value))
}

impl Cli {
    fn config(&self) -> Result<SimConfig> {
        let mut config = SimConfig::default();
        config.timings.green = seconds("green", self.green)?;
        config.timings.yellow = seconds("yellow", self.yellow)?;
        config.priority.preempt_duration = seconds("preempt", self.preempt)?;
        config.spawn.enabled = !self.no_spawn;
        Ok(config)
    }

    fn options(&self) -> Result<SimulationOptions> {
        let toggle_every = match self.toggle_priority_every {
            Some(secs) => Some(seconds("toggle-priority-every", secs)?).filter(|d| !d.is_zero()),
            None => None,
        };
        let refresh = Some(seconds("refresh", self.refresh)?).filter(|d| !d.is_zero());
        Ok(SimulationOptions {
            ordinary_cars: self.cars,
            seed: self.seed,
            priority_mode: self.priority_mode,
            toggle_every,
            refresh,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let duration = seconds("seconds", cli.seconds)?;
    let config = cli.config()?;
    let layout = config.layout.clone();
    let simulation = Simulation::build(config, cli.options()?)?;

    println!("Running traffic priority simulation in headless mode...");
    println!(
        "Run time: {:.1}s, ordinary vehicles: {}, spawner: {}",
        duration.as_secs_f32(),
        simulation.roster().ordinary.len(),
        if cli.no_spawn { "off" } else { "on" }
    );
    println!();

    let report = simulation.run_for(duration).await?;

    println!("=== Final State ===");
    report.snapshot.print_summary(report.elapsed);
    println!("Emergency vehicles spawned: {}", report.spawned);
    if cli.map {
        report.snapshot.draw_map(&layout);
    }

    info!("SIMULATION COMPLETE");
    Ok(())
}
