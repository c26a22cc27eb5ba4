use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use crate::heap::HeapKey;
use crate::world::{BlockUpdate, Map, World, WorldState};
use crate::TaskError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskCategory {
    Physics,
    Scripting,
}

impl TaskCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskCategory::Physics => "physics",
            TaskCategory::Scripting => "scripting",
        }
    }
}

impl fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a scheduled unit of work.
///
/// `perform_internal` runs on the world's physics thread with the world lock
/// held. `Ok(0)` completes the task; `Ok(n)` asks to run again no sooner than
/// `n` milliseconds from now. An `Err` (or a panic) drops the task.
pub trait PhysicsTask: Send {
    fn perform_internal(&mut self, cx: &mut TaskContext<'_>) -> Result<u32, TaskError>;

    /// Runs instead of `perform_internal` when the task is deleted, or when the
    /// scheduler shuts down with the task still queued, while its map is still
    /// live. The world lock is held. Undo anything left in the map here.
    fn on_dropped(&mut self, _cx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        Ok(())
    }

    fn category(&self) -> TaskCategory {
        TaskCategory::Physics
    }

    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Cancels a scheduled task from any thread. The entry stays queued until the
/// physics thread pops it and then is dropped without running.
#[derive(Debug, Clone, Default)]
pub struct TaskHandle {
    deleted: Arc<AtomicBool>,
}

impl TaskHandle {
    pub fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::SeqCst);
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::SeqCst)
    }
}

/// World and map identity captured when a task is created.
#[derive(Debug, Clone)]
pub struct TaskBinding {
    world: Weak<World>,
    map: Option<Weak<Map>>,
}

impl TaskBinding {
    /// Snapshots the world's current map under the world lock.
    pub fn capture(world: &Arc<World>) -> Self {
        let state = world.sync_root();
        Self::from_locked(Arc::downgrade(world), &state)
    }

    fn from_locked(world: Weak<World>, state: &WorldState) -> Self {
        Self {
            world,
            map: state.map.as_ref().map(Arc::downgrade),
        }
    }

    /// Whether the captured map is still the one installed in `state`.
    pub(crate) fn matches(&self, state: &WorldState) -> bool {
        match (&self.map, &state.map) {
            (Some(captured), Some(current)) => {
                Weak::ptr_eq(captured, &Arc::downgrade(current))
            }
            _ => false,
        }
    }
}

/// A task body together with its binding, ready to be handed to a scheduler.
pub struct BoundTask {
    pub(crate) binding: TaskBinding,
    pub(crate) deleted: TaskHandle,
    pub(crate) body: Box<dyn PhysicsTask>,
}

impl fmt::Debug for BoundTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundTask")
            .field("name", &self.body.name())
            .field("category", &self.body.category())
            .field("deleted", &self.deleted.is_deleted())
            .finish()
    }
}

impl BoundTask {
    pub fn new<T>(world: &Arc<World>, body: T) -> Self
    where
        T: PhysicsTask + 'static,
    {
        Self::with_binding(TaskBinding::capture(world), body)
    }

    pub fn with_binding<T>(binding: TaskBinding, body: T) -> Self
    where
        T: PhysicsTask + 'static,
    {
        Self {
            binding,
            deleted: TaskHandle::default(),
            body: Box::new(body),
        }
    }

    pub fn handle(&self) -> TaskHandle {
        self.deleted.clone()
    }

    pub fn name(&self) -> &'static str {
        self.body.name()
    }

    pub fn category(&self) -> TaskCategory {
        self.body.category()
    }
}

/// What the physics thread sees while a task body runs. The world lock is
/// held for the lifetime of the context, so it only exposes the already
/// locked state, never the `World` itself.
pub struct TaskContext<'a> {
    world: &'a Arc<World>,
    state: &'a WorldState,
    map: &'a Arc<Map>,
    deleted: &'a TaskHandle,
    stop_requested: &'a AtomicBool,
}

impl<'a> TaskContext<'a> {
    pub fn world_name(&self) -> &str {
        self.world.name()
    }

    /// The locked world state.
    pub fn state(&self) -> &WorldState {
        self.state
    }

    pub fn map(&self) -> &Map {
        self.map
    }

    /// Set when the task was marked deleted after this execution began.
    /// Checked before dispatch too; bodies that loop internally may poll it.
    pub fn is_deleted(&self) -> bool {
        self.deleted.is_deleted()
    }

    /// Set once the owning scheduler is shutting down. Long-running bodies
    /// should return promptly when they observe it.
    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Writes the block and queues the change for propagation.
    pub fn update_map(&self, update: BlockUpdate) -> Result<(), TaskError> {
        self.map.set_block(update.coords, update.block)?;
        self.map.queue_update(update);
        Ok(())
    }

    /// Binds `body` to the map this task is running against. Use this instead
    /// of [`BoundTask::new`] from inside a task; the world lock is already held.
    pub fn bind<T>(&self, body: T) -> BoundTask
    where
        T: PhysicsTask + 'static,
    {
        let binding = TaskBinding::from_locked(Arc::downgrade(self.world), self.state);
        BoundTask::with_binding(binding, body)
    }

    /// Schedules a follow-up task on the same world.
    pub fn schedule<T>(&self, body: T, delay_ms: u32) -> TaskHandle
    where
        T: PhysicsTask + 'static,
    {
        let task = self.bind(body);
        self.world.physics().add_task(task, delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SkipReason {
    Deleted,
    WorldGone,
    StaleMap,
}

impl SkipReason {
    fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Deleted => "deleted",
            SkipReason::WorldGone => "world dropped",
            SkipReason::StaleMap => "map replaced",
        }
    }
}

enum Outcome {
    Ran(thread::Result<Result<u32, TaskError>>),
    Dropped(thread::Result<Result<(), TaskError>>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Execution {
    Completed,
    Reschedule(u32),
    Skipped(SkipReason),
    Failed(String),
}

/// Queue entry: a bound task plus the due time the scheduler orders it by.
pub(crate) struct ScheduledTask {
    pub(crate) due_time: i64,
    pub(crate) task: BoundTask,
}

impl HeapKey for ScheduledTask {
    type Key = i64;

    fn heap_key(&self) -> i64 {
        self.due_time
    }
}

impl ScheduledTask {
    /// Runs the task under its world's lock unless its map is no longer live.
    /// A deleted task gets its `on_dropped` hook instead. Failures never escape.
    pub(crate) fn perform(&mut self, world_name: &str, stop_requested: &AtomicBool) -> Execution {
        let outcome = self.with_locked_context(stop_requested, |body, cx| {
            if cx.is_deleted() {
                Outcome::Dropped(panic::catch_unwind(AssertUnwindSafe(|| body.on_dropped(cx))))
            } else {
                Outcome::Ran(panic::catch_unwind(AssertUnwindSafe(|| {
                    body.perform_internal(cx)
                })))
            }
        });

        match outcome {
            Err(reason) => self.skip(world_name, reason),
            Ok(Outcome::Dropped(result)) => {
                self.report_cleanup(world_name, result);
                self.skip(world_name, SkipReason::Deleted)
            }
            Ok(Outcome::Ran(Ok(Ok(0)))) => Execution::Completed,
            Ok(Outcome::Ran(Ok(Ok(delay)))) => Execution::Reschedule(delay),
            Ok(Outcome::Ran(Ok(Err(err)))) => {
                log::error!(
                    "physics task {} ({}) in world {} failed: {}",
                    self.task.name(),
                    self.task.category(),
                    world_name,
                    err
                );
                Execution::Failed(err.to_string())
            }
            Ok(Outcome::Ran(Err(payload))) => {
                let reason = panic_message(payload.as_ref());
                log::error!(
                    "physics task {} ({}) in world {} panicked: {}",
                    self.task.name(),
                    self.task.category(),
                    world_name,
                    reason
                );
                Execution::Failed(reason)
            }
        }
    }

    /// Gives a task the scheduler is throwing away a chance to clean up.
    pub(crate) fn discard(&mut self, world_name: &str, stop_requested: &AtomicBool) {
        let result = self.with_locked_context(stop_requested, |body, cx| {
            panic::catch_unwind(AssertUnwindSafe(|| body.on_dropped(cx)))
        });
        match result {
            Ok(result) => self.report_cleanup(world_name, result),
            Err(reason) => {
                self.skip(world_name, reason);
            }
        }
    }

    fn with_locked_context<R>(
        &mut self,
        stop_requested: &AtomicBool,
        run: impl FnOnce(&mut dyn PhysicsTask, &mut TaskContext<'_>) -> R,
    ) -> Result<R, SkipReason> {
        let world = self
            .task
            .binding
            .world
            .upgrade()
            .ok_or(SkipReason::WorldGone)?;
        let state = world.sync_root();
        if !self.task.binding.matches(&state) {
            return Err(SkipReason::StaleMap);
        }
        let map = state.map.clone().ok_or(SkipReason::StaleMap)?;

        let mut cx = TaskContext {
            world: &world,
            state: &state,
            map: &map,
            deleted: &self.task.deleted,
            stop_requested,
        };
        Ok(run(self.task.body.as_mut(), &mut cx))
    }

    fn report_cleanup(&self, world_name: &str, result: thread::Result<Result<(), TaskError>>) {
        let reason = match result {
            Ok(Ok(())) => return,
            Ok(Err(err)) => err.to_string(),
            Err(payload) => panic_message(payload.as_ref()),
        };
        log::warn!(
            "cleanup of dropped physics task {} in world {} failed: {}",
            self.task.name(),
            world_name,
            reason
        );
    }

    fn skip(&self, world_name: &str, reason: SkipReason) -> Execution {
        log::debug!(
            "skipping physics task {} in world {}: {}",
            self.task.name(),
            world_name,
            reason.as_str()
        );
        Execution::Skipped(reason)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::geometry::Vector3I;
    use crate::world::Block;
    use std::sync::atomic::AtomicU32;

    struct Counting {
        calls: Arc<AtomicU32>,
        result: Result<u32, TaskError>,
    }

    impl PhysicsTask for Counting {
        fn perform_internal(&mut self, _cx: &mut TaskContext<'_>) -> Result<u32, TaskError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    struct Panicking;

    impl PhysicsTask for Panicking {
        fn perform_internal(&mut self, _cx: &mut TaskContext<'_>) -> Result<u32, TaskError> {
            panic!("boom");
        }

        fn category(&self) -> TaskCategory {
            TaskCategory::Scripting
        }
    }

    fn idle_world(name: &str) -> Arc<World> {
        let world = World::load(
            name,
            crate::world::Map::new(4, 4, 4).expect("map"),
            SchedulerConfig::default(),
        )
        .expect("world");
        world.physics().stop();
        world
    }

    fn scheduled(world: &Arc<World>, body: impl PhysicsTask + 'static) -> ScheduledTask {
        ScheduledTask {
            due_time: 0,
            task: BoundTask::new(world, body),
        }
    }

    #[test]
    fn perform_maps_results_to_executions() {
        let world = idle_world("guard-results");
        let stop = AtomicBool::new(false);
        let calls = Arc::new(AtomicU32::new(0));

        let mut done = scheduled(
            &world,
            Counting {
                calls: Arc::clone(&calls),
                result: Ok(0),
            },
        );
        assert_eq!(done.perform("w", &stop), Execution::Completed);

        let mut again = scheduled(
            &world,
            Counting {
                calls: Arc::clone(&calls),
                result: Ok(25),
            },
        );
        assert_eq!(again.perform("w", &stop), Execution::Reschedule(25));

        let mut failing = scheduled(
            &world,
            Counting {
                calls: Arc::clone(&calls),
                result: Err(TaskError::failed("nope")),
            },
        );
        assert!(matches!(failing.perform("w", &stop), Execution::Failed(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn deleted_task_is_not_invoked() {
        let world = idle_world("guard-deleted");
        let calls = Arc::new(AtomicU32::new(0));
        let mut task = scheduled(
            &world,
            Counting {
                calls: Arc::clone(&calls),
                result: Ok(10),
            },
        );
        task.task.handle().mark_deleted();
        assert_eq!(
            task.perform("w", &AtomicBool::new(false)),
            Execution::Skipped(SkipReason::Deleted)
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stale_map_is_skipped() {
        let world = idle_world("guard-stale");
        let calls = Arc::new(AtomicU32::new(0));
        let mut task = scheduled(
            &world,
            Counting {
                calls: Arc::clone(&calls),
                result: Ok(10),
            },
        );
        world.replace_map(crate::world::Map::new(4, 4, 4).expect("map"));
        assert_eq!(
            task.perform("w", &AtomicBool::new(false)),
            Execution::Skipped(SkipReason::StaleMap)
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn task_bound_to_unloaded_world_is_skipped() {
        let world = idle_world("guard-unloaded");
        let calls = Arc::new(AtomicU32::new(0));
        let mut task = scheduled(
            &world,
            Counting {
                calls: Arc::clone(&calls),
                result: Ok(10),
            },
        );
        world.unload();
        assert_eq!(
            task.perform("w", &AtomicBool::new(false)),
            Execution::Skipped(SkipReason::StaleMap)
        );

        drop(world);
        assert_eq!(
            task.perform("w", &AtomicBool::new(false)),
            Execution::Skipped(SkipReason::WorldGone)
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panic_in_body_is_contained_and_world_lock_stays_usable() {
        let world = idle_world("guard-panic");
        let mut task = scheduled(&world, Panicking);
        match task.perform("w", &AtomicBool::new(false)) {
            Execution::Failed(reason) => assert_eq!(reason, "boom"),
            other => panic!("unexpected execution: {other:?}"),
        }
        assert!(world.is_loaded());
    }

    #[test]
    fn update_map_writes_block_and_queues_update() {
        struct Place;
        impl PhysicsTask for Place {
            fn perform_internal(&mut self, cx: &mut TaskContext<'_>) -> Result<u32, TaskError> {
                cx.update_map(BlockUpdate::new(Vector3I::new(1, 1, 1), Block::Sand))?;
                Ok(0)
            }
        }

        let world = idle_world("guard-update");
        let mut task = scheduled(&world, Place);
        assert_eq!(task.perform("w", &AtomicBool::new(false)), Execution::Completed);
        let map = world.map().expect("map");
        assert_eq!(map.get_block(Vector3I::new(1, 1, 1)), Some(Block::Sand));
        assert_eq!(
            map.drain_updates(),
            vec![BlockUpdate::new(Vector3I::new(1, 1, 1), Block::Sand)]
        );
    }

    #[test]
    fn out_of_bounds_update_fails_the_task() {
        struct PlaceOutside;
        impl PhysicsTask for PlaceOutside {
            fn perform_internal(&mut self, cx: &mut TaskContext<'_>) -> Result<u32, TaskError> {
                cx.update_map(BlockUpdate::new(Vector3I::new(9, 9, 9), Block::Sand))?;
                Ok(5)
            }
        }

        let world = idle_world("guard-outside");
        let mut task = scheduled(&world, PlaceOutside);
        assert!(matches!(
            task.perform("w", &AtomicBool::new(false)),
            Execution::Failed(_)
        ));
        assert_eq!(world.map().expect("map").pending_update_count(), 0);
    }

    #[test]
    fn panic_message_reads_string_payloads() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(owned.as_ref()), "owned");
        let other: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }
}
