use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::config::SchedulerConfig;
use crate::geometry::Vector3I;
use crate::runtime_util::lock_unpoisoned;
use crate::scheduler::PhysicsScheduler;
use crate::task::{BoundTask, PhysicsTask, TaskHandle};
use crate::PhysicsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Block {
    Air = 0,
    Stone = 1,
    Grass = 2,
    Dirt = 3,
    Cobblestone = 4,
    Water = 8,
    Lava = 10,
    Sand = 12,
    Glass = 20,
    Tnt = 46,
    Obsidian = 49,
}

impl Block {
    pub fn is_solid(self) -> bool {
        !matches!(self, Block::Air | Block::Water | Block::Lava)
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One block change to be propagated to connected observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockUpdate {
    pub coords: Vector3I,
    pub block: Block,
}

impl BlockUpdate {
    pub fn new(coords: Vector3I, block: Block) -> Self {
        Self { coords, block }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapDimensions {
    pub width: i32,
    pub length: i32,
    pub height: i32,
}

/// Block storage of one loaded world. Identity matters: a reload installs a
/// new `Map` instance, and tasks bound to the old instance stop running.
#[derive(Debug)]
pub struct Map {
    dimensions: MapDimensions,
    blocks: Mutex<Vec<Block>>,
    updates: Mutex<Vec<BlockUpdate>>,
}

impl Map {
    pub fn new(width: i32, length: i32, height: i32) -> Result<Self, PhysicsError> {
        if width <= 0 || length <= 0 || height <= 0 {
            return Err(PhysicsError::InvalidConfig {
                reason: format!("map dimensions must be positive: {width}x{length}x{height}"),
            });
        }
        let volume = (width as usize)
            .checked_mul(length as usize)
            .and_then(|area| area.checked_mul(height as usize))
            .ok_or_else(|| PhysicsError::InvalidConfig {
                reason: format!("map dimensions too large: {width}x{length}x{height}"),
            })?;
        Ok(Self {
            dimensions: MapDimensions {
                width,
                length,
                height,
            },
            blocks: Mutex::new(vec![Block::Air; volume]),
            updates: Mutex::new(Vec::new()),
        })
    }

    /// Fills every layer below `height` with `block`.
    pub fn with_floor(self, block: Block, height: i32) -> Self {
        {
            let mut blocks = lock_unpoisoned(&self.blocks);
            for z in 0..height.min(self.dimensions.height) {
                for y in 0..self.dimensions.length {
                    for x in 0..self.dimensions.width {
                        if let Some(idx) = self.index(Vector3I::new(x, y, z)) {
                            blocks[idx] = block;
                        }
                    }
                }
            }
        }
        self
    }

    pub fn dimensions(&self) -> MapDimensions {
        self.dimensions
    }

    pub fn in_bounds(&self, coords: Vector3I) -> bool {
        self.index(coords).is_some()
    }

    pub fn get_block(&self, coords: Vector3I) -> Option<Block> {
        let idx = self.index(coords)?;
        Some(lock_unpoisoned(&self.blocks)[idx])
    }

    /// Writes `block` and returns the block it replaced.
    pub fn set_block(&self, coords: Vector3I, block: Block) -> Result<Block, PhysicsError> {
        let idx = self
            .index(coords)
            .ok_or(PhysicsError::OutOfBounds { coords })?;
        let mut blocks = lock_unpoisoned(&self.blocks);
        Ok(std::mem::replace(&mut blocks[idx], block))
    }

    pub fn queue_update(&self, update: BlockUpdate) {
        lock_unpoisoned(&self.updates).push(update);
    }

    pub fn pending_update_count(&self) -> usize {
        lock_unpoisoned(&self.updates).len()
    }

    /// Hands queued updates to the propagation side.
    pub fn drain_updates(&self) -> Vec<BlockUpdate> {
        std::mem::take(&mut *lock_unpoisoned(&self.updates))
    }

    fn index(&self, coords: Vector3I) -> Option<usize> {
        let MapDimensions {
            width,
            length,
            height,
        } = self.dimensions;
        if coords.x < 0
            || coords.y < 0
            || coords.z < 0
            || coords.x >= width
            || coords.y >= length
            || coords.z >= height
        {
            return None;
        }
        let idx = (coords.z as usize * length as usize + coords.y as usize) * width as usize
            + coords.x as usize;
        Some(idx)
    }
}

/// State guarded by the world lock.
#[derive(Debug, Default)]
pub struct WorldState {
    pub(crate) map: Option<Arc<Map>>,
}

impl WorldState {
    pub fn map(&self) -> Option<&Arc<Map>> {
        self.map.as_ref()
    }
}

pub struct World {
    name: String,
    sync_root: Mutex<WorldState>,
    physics: PhysicsScheduler,
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("name", &self.name)
            .field("loaded", &self.is_loaded())
            .field("physics", &self.physics)
            .finish()
    }
}

impl World {
    /// Installs `map` and starts the world's physics scheduler.
    pub fn load(
        name: impl Into<String>,
        map: Map,
        config: SchedulerConfig,
    ) -> Result<Arc<World>, PhysicsError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(PhysicsError::InvalidConfig {
                reason: "world name cannot be empty".to_string(),
            });
        }
        let world = Arc::new(World {
            physics: PhysicsScheduler::new(name.clone(), config),
            name,
            sync_root: Mutex::new(WorldState {
                map: Some(Arc::new(map)),
            }),
        });
        world.physics.start()?;
        log::info!("world {} loaded", world.name);
        Ok(world)
    }

    /// Stops physics (dropping pending tasks) and releases the map. Not for
    /// use from inside a task body, which already holds the world lock.
    pub fn unload(&self) {
        if self.physics.started() {
            self.physics.stop();
        }
        let previous = self.sync_root().map.take();
        if previous.is_some() {
            log::info!("world {} unloaded", self.name);
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The world's mutual-exclusion lock. Held by the physics worker for the
    /// whole execution of each task.
    pub fn sync_root(&self) -> MutexGuard<'_, WorldState> {
        lock_unpoisoned(&self.sync_root)
    }

    pub fn map(&self) -> Option<Arc<Map>> {
        self.sync_root().map.clone()
    }

    /// Like [`World::map`], for callers that treat an unloaded world as an error.
    pub fn loaded_map(&self) -> Result<Arc<Map>, PhysicsError> {
        self.map().ok_or_else(|| PhysicsError::WorldNotLoaded {
            world: self.name.clone(),
        })
    }

    pub fn is_loaded(&self) -> bool {
        self.sync_root().map.is_some()
    }

    /// Installs a new map instance, returning the previous one. Tasks bound to
    /// the previous map will be skipped from now on.
    pub fn replace_map(&self, map: Map) -> Option<Arc<Map>> {
        let previous = self.sync_root().map.replace(Arc::new(map));
        log::info!("world {} map replaced", self.name);
        previous
    }

    pub fn physics(&self) -> &PhysicsScheduler {
        &self.physics
    }

    /// Binds `body` to this world's current map and schedules it.
    pub fn add_physics_task<T>(self: &Arc<Self>, body: T, delay_ms: u32) -> TaskHandle
    where
        T: PhysicsTask + 'static,
    {
        let task = BoundTask::new(self, body);
        self.physics.add_task(task, delay_ms)
    }
}
