//! Per-world physics scheduling for a block world server.
//!
//! Each loaded [`World`] owns one [`PhysicsScheduler`]: a dedicated thread
//! that runs [`PhysicsTask`]s in due-time order, each under the world lock,
//! and silently drops tasks whose map has been replaced since they were
//! created.

mod config;
mod error;
mod geometry;
mod heap;
mod particle;
mod runtime_util;
mod scheduler;
mod task;
mod world;

pub use config::{
    SchedulerConfig, DEFAULT_CONFIG_FILE_NAME, DEFAULT_SHUTDOWN_TIMEOUT_MS, DEFAULT_WORKER_PREFIX,
    ENV_SHUTDOWN_TIMEOUT_MS, ENV_WORKER_PREFIX,
};
pub use error::{ConfigError, PhysicsError, TaskError};
pub use geometry::{Vector3F, Vector3I};
pub use heap::{HeapKey, MinBinaryHeap};
pub use particle::{
    BulletBehavior, ExplodingBehavior, ParticleBehavior, ParticleTask, DEFAULT_MAX_RANGE,
    DEFAULT_STEP_DELAY_MS,
};
pub use scheduler::{PhysicsScheduler, SchedulerState, SchedulerStats};
pub use task::{BoundTask, PhysicsTask, TaskBinding, TaskCategory, TaskContext, TaskHandle};
pub use world::{Block, BlockUpdate, Map, MapDimensions, World, WorldState};
