//! Projectiles flying through a world's map.
//!
//! A [`ParticleTask`] advances one block per step along its direction,
//! drawing itself at the new cell and restoring whatever it covered at the
//! previous one. What happens when it reaches a solid block is up to its
//! [`ParticleBehavior`].

use std::sync::Arc;

use crate::geometry::{Vector3F, Vector3I};
use crate::task::{PhysicsTask, TaskContext};
use crate::world::{Block, BlockUpdate, World};
use crate::{TaskError, TaskHandle};

pub const DEFAULT_STEP_DELAY_MS: u32 = 50;
pub const DEFAULT_MAX_RANGE: u32 = 64;

pub trait ParticleBehavior: Send + Sync {
    /// Delay between steps.
    fn step_delay_ms(&self) -> u32 {
        DEFAULT_STEP_DELAY_MS
    }

    fn max_range(&self) -> u32 {
        DEFAULT_MAX_RANGE
    }

    /// Whether the particle may enter `block`.
    fn can_pass(&self, block: Block) -> bool {
        !block.is_solid()
    }

    /// Called once when the next cell is blocked. The particle has already
    /// been erased from the map.
    fn on_hit(&self, cx: &TaskContext<'_>, at: Vector3I, hit: Block) -> Result<(), TaskError>;
}

/// Stops at the first solid block and leaves the world untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct BulletBehavior;

impl ParticleBehavior for BulletBehavior {
    fn on_hit(&self, _cx: &TaskContext<'_>, _at: Vector3I, _hit: Block) -> Result<(), TaskError> {
        Ok(())
    }
}

/// Clears a sphere of blocks around the impact point. Obsidian survives.
#[derive(Debug, Clone, Copy)]
pub struct ExplodingBehavior {
    pub radius: i32,
}

impl Default for ExplodingBehavior {
    fn default() -> Self {
        Self { radius: 2 }
    }
}

impl ParticleBehavior for ExplodingBehavior {
    fn on_hit(&self, cx: &TaskContext<'_>, at: Vector3I, _hit: Block) -> Result<(), TaskError> {
        let radius = self.radius.max(0);
        let radius_sq = i64::from(radius) * i64::from(radius);
        for dz in -radius..=radius {
            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    let offset = Vector3I::new(dx, dy, dz);
                    if offset.distance_squared(Vector3I::default()) > radius_sq {
                        continue;
                    }
                    let coords = at + offset;
                    match cx.map().get_block(coords) {
                        Some(Block::Air) | Some(Block::Obsidian) | None => {}
                        Some(_) => cx.update_map(BlockUpdate::new(coords, Block::Air))?,
                    }
                }
            }
        }
        Ok(())
    }
}

pub struct ParticleTask {
    origin: Vector3F,
    direction: Vector3F,
    block: Block,
    behavior: Arc<dyn ParticleBehavior>,
    step: u32,
    // Cell the particle currently occupies and the block it covered there.
    current: Option<(Vector3I, Block)>,
}

impl ParticleTask {
    pub fn new(
        origin: Vector3I,
        direction: Vector3F,
        block: Block,
        behavior: Arc<dyn ParticleBehavior>,
    ) -> Self {
        Self {
            origin: Vector3F::from(origin),
            direction: direction.normalized(),
            block,
            behavior,
            step: 0,
            current: None,
        }
    }

    /// Fires a particle into `world`, starting next tick. Marking the handle
    /// deleted removes the particle from the map at its next step.
    pub fn fire(
        world: &Arc<World>,
        origin: Vector3I,
        direction: Vector3F,
        block: Block,
        behavior: Arc<dyn ParticleBehavior>,
    ) -> TaskHandle {
        world.add_physics_task(Self::new(origin, direction, block, behavior), 0)
    }

    fn erase(&mut self, cx: &TaskContext<'_>) -> Result<(), TaskError> {
        if let Some((at, covered)) = self.current.take() {
            cx.update_map(BlockUpdate::new(at, covered))?;
        }
        Ok(())
    }
}

impl PhysicsTask for ParticleTask {
    fn perform_internal(&mut self, cx: &mut TaskContext<'_>) -> Result<u32, TaskError> {
        let mut next = self.current.map(|(at, _)| at);
        // A diagonal direction can round back to the same cell; keep stepping.
        while next == self.current.map(|(at, _)| at) {
            self.step += 1;
            if self.step > self.behavior.max_range() {
                self.erase(cx)?;
                return Ok(0);
            }
            let position = self.origin + self.direction.scaled(self.step as f32);
            next = Some(position.round_to_block());
        }
        let Some(next) = next else {
            return Ok(0);
        };

        let Some(found) = cx.map().get_block(next) else {
            self.erase(cx)?;
            return Ok(0);
        };

        if !self.behavior.can_pass(found) {
            self.erase(cx)?;
            self.behavior.on_hit(cx, next, found)?;
            return Ok(0);
        }

        self.erase(cx)?;
        cx.update_map(BlockUpdate::new(next, self.block))?;
        self.current = Some((next, found));
        Ok(self.behavior.step_delay_ms().max(1))
    }

    fn on_dropped(&mut self, cx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        self.erase(cx)
    }

    fn name(&self) -> &'static str {
        "particle"
    }
}
