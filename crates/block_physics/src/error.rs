use std::fmt;

use crate::geometry::Vector3I;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhysicsError {
    InvalidConfig { reason: String },
    ThreadSpawnFailed { world: String, reason: String },
    WorldNotLoaded { world: String },
    OutOfBounds { coords: Vector3I },
}

impl fmt::Display for PhysicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhysicsError::InvalidConfig { reason } => {
                write!(f, "invalid physics config: {}", reason)
            }
            PhysicsError::ThreadSpawnFailed { world, reason } => {
                write!(f, "failed to spawn physics thread for {}: {}", world, reason)
            }
            PhysicsError::WorldNotLoaded { world } => write!(f, "world not loaded: {}", world),
            PhysicsError::OutOfBounds { coords } => {
                write!(f, "block coordinates out of map bounds: {}", coords)
            }
        }
    }
}

impl std::error::Error for PhysicsError {}

/// Failure raised from a task body. The scheduler logs it and drops the task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    Failed { reason: String },
    OutOfBounds { coords: Vector3I },
}

impl TaskError {
    pub fn failed(reason: impl Into<String>) -> Self {
        TaskError::Failed {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::Failed { reason } => write!(f, "task failed: {}", reason),
            TaskError::OutOfBounds { coords } => {
                write!(f, "task touched block outside the map: {}", coords)
            }
        }
    }
}

impl std::error::Error for TaskError {}

impl From<PhysicsError> for TaskError {
    fn from(err: PhysicsError) -> Self {
        match err {
            PhysicsError::OutOfBounds { coords } => TaskError::OutOfBounds { coords },
            other => TaskError::Failed {
                reason: other.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    ReadConfigFile { path: String, message: String },
    ParseConfigFile { path: String, message: String },
    InvalidValue { key: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ReadConfigFile { path, message } => {
                write!(f, "read config file failed ({path}): {message}")
            }
            ConfigError::ParseConfigFile { path, message } => {
                write!(f, "parse config file failed ({path}): {message}")
            }
            ConfigError::InvalidValue { key, value } => {
                write!(f, "invalid value for {key}: {value}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for PhysicsError {
    fn from(err: ConfigError) -> Self {
        PhysicsError::InvalidConfig {
            reason: err.to_string(),
        }
    }
}
