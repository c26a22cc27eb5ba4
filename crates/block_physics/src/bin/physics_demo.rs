use block_physics::{
    Block, BulletBehavior, ExplodingBehavior, Map, ParticleBehavior, ParticleTask,
    SchedulerConfig, SchedulerStats, Vector3F, Vector3I, World,
};
use serde::Serialize;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug)]
struct Options {
    config: Option<PathBuf>,
    world: String,
    particles: u32,
    run_ms: u64,
    reload: bool,
}

#[derive(Debug, Serialize)]
struct DemoReport {
    world: String,
    particles: u32,
    reloaded: bool,
    executed: u64,
    rescheduled: u64,
    skipped: u64,
    failed: u64,
    block_updates: usize,
}

impl DemoReport {
    fn new(options: &Options, stats: SchedulerStats, block_updates: usize) -> Self {
        Self {
            world: options.world.clone(),
            particles: options.particles,
            reloaded: options.reload,
            executed: stats.executed,
            rescheduled: stats.rescheduled,
            skipped: stats.skipped,
            failed: stats.failed,
            block_updates,
        }
    }
}

fn usage() -> &'static str {
    "Usage: cargo run -p block_physics --bin physics_demo -- \\
  [--config <block_physics.toml>] [--world <name>] [--particles <n>] [--run-ms <ms>] [--reload]"
}

fn parse_args() -> Result<Options, String> {
    let mut options = Options {
        config: None,
        world: "demo".to_string(),
        particles: 8,
        run_ms: 1_500,
        reload: false,
    };

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let Some(value) = args.next() else {
                    return Err("missing value for --config".to_string());
                };
                options.config = Some(PathBuf::from(value));
            }
            "--world" => {
                let Some(value) = args.next() else {
                    return Err("missing value for --world".to_string());
                };
                options.world = value;
            }
            "--particles" => {
                let Some(value) = args.next() else {
                    return Err("missing value for --particles".to_string());
                };
                options.particles = value
                    .parse()
                    .map_err(|_| format!("invalid --particles value: {value}"))?;
            }
            "--run-ms" => {
                let Some(value) = args.next() else {
                    return Err("missing value for --run-ms".to_string());
                };
                options.run_ms = value
                    .parse()
                    .map_err(|_| format!("invalid --run-ms value: {value}"))?;
            }
            "--reload" => options.reload = true,
            "-h" | "--help" => {
                return Err(usage().to_string());
            }
            other => {
                return Err(format!("unknown argument: {other}"));
            }
        }
    }
    Ok(options)
}

/// Spreads `count` particles evenly over a full turn.
fn particle_rotation(idx: u32, count: u32) -> u8 {
    let turn = u64::from(idx) * 256 / u64::from(count.max(1));
    u8::try_from(turn % 256).unwrap_or(0)
}

fn run() -> Result<(), String> {
    let options = parse_args()?;
    let config = match &options.config {
        Some(path) => SchedulerConfig::from_config_file(path),
        None => SchedulerConfig::from_default_sources(),
    }
    .map_err(|err| err.to_string())?;

    let map = Map::new(64, 64, 32)
        .map_err(|err| err.to_string())?
        .with_floor(Block::Stone, 8);
    let world = World::load(options.world.clone(), map, config).map_err(|err| err.to_string())?;

    let bullet: Arc<dyn ParticleBehavior> = Arc::new(BulletBehavior);
    let tnt: Arc<dyn ParticleBehavior> = Arc::new(ExplodingBehavior::default());
    for idx in 0..options.particles {
        let rotation = particle_rotation(idx, options.particles);
        let behavior = if idx % 2 == 0 { &bullet } else { &tnt };
        ParticleTask::fire(
            &world,
            Vector3I::new(32, 32, 12),
            Vector3F::from_rotation(rotation, 16),
            if idx % 2 == 0 { Block::Glass } else { Block::Tnt },
            Arc::clone(behavior),
        );
    }

    let mut block_updates = 0;
    if options.reload {
        thread::sleep(Duration::from_millis(options.run_ms / 2));
        if let Some(previous) = world.replace_map(
            Map::new(64, 64, 32)
                .map_err(|err| err.to_string())?
                .with_floor(Block::Stone, 8),
        ) {
            block_updates += previous.drain_updates().len();
        }
        thread::sleep(Duration::from_millis(options.run_ms / 2));
    } else {
        thread::sleep(Duration::from_millis(options.run_ms));
    }

    block_updates += world
        .loaded_map()
        .map_err(|err| err.to_string())?
        .drain_updates()
        .len();
    let stats = world.physics().stats();
    world.unload();

    let report = DemoReport::new(&options, stats, block_updates);
    let rendered = serde_json::to_string_pretty(&report).map_err(|err| err.to_string())?;
    println!("{rendered}");
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(error) = run() {
        eprintln!("error: {error}");
        eprintln!("{}", usage());
        std::process::exit(2);
    }
}

#[cfg(test)]
mod tests {
    use super::particle_rotation;

    #[test]
    fn rotation_spreads_over_a_full_turn() {
        assert_eq!(particle_rotation(0, 4), 0);
        assert_eq!(particle_rotation(1, 4), 64);
        assert_eq!(particle_rotation(3, 4), 192);
        assert_eq!(particle_rotation(0, 0), 0);
    }

    #[test]
    fn rotation_handles_large_particle_counts() {
        let count = 20_000_000;
        assert_eq!(particle_rotation(count - 1, count), 255);
        assert_eq!(particle_rotation(count / 2, count), 128);
    }
}
