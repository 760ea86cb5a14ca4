//! The task orchestration engine.
//!
//! A flow is an ordered list of tasks over a typed per-run store. Each task
//! declares the store keys it requires and the keys it provides; the engine
//! resolves a deterministic execution order (topological over the declared
//! keys, ties broken by insertion order), executes the tasks, and on any
//! failure reverts the already-completed tasks in reverse completion order.
//! A revert failure is logged and never masks the original failure or stops
//! the remaining reverts.

/// The create-volume pipeline.
pub mod create_volume;
/// The manage-existing-volume pipeline.
pub mod manage;

use crate::{controller::registry::Registry, SvcError};
use indexmap::IndexMap;
use std::any::Any;
use std::collections::HashSet;

/// Typed key-value store owned by exactly one flow run.
#[derive(Default)]
pub struct FlowStore {
    flow: &'static str,
    values: IndexMap<&'static str, Box<dyn Any + Send + Sync>>,
}

impl FlowStore {
    /// A new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a value under the given key, replacing any previous value.
    pub fn put<T: Send + Sync + 'static>(&mut self, key: &'static str, value: T) {
        self.values.insert(key, Box::new(value));
    }

    /// Borrow the value under the given key.
    pub fn get<T: Send + Sync + 'static>(&self, key: &'static str) -> Result<&T, SvcError> {
        self.values
            .get(key)
            .and_then(|value| value.downcast_ref::<T>())
            .ok_or(SvcError::FlowInput {
                flow: self.flow.to_string(),
                key: key.to_string(),
            })
    }

    /// Take the value under the given key out of the store.
    pub fn take<T: Send + Sync + 'static>(&mut self, key: &'static str) -> Result<T, SvcError> {
        let missing = || SvcError::FlowInput {
            flow: self.flow.to_string(),
            key: key.to_string(),
        };
        let value = self.values.shift_remove(key).ok_or_else(missing)?;
        let value = value.downcast::<T>().map_err(|_| missing())?;
        Ok(*value)
    }

    /// Check whether the key holds a value.
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// The keys currently held.
    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.values.keys().copied()
    }
}

/// A named unit of work with declared inputs and outputs and a revert hook.
#[async_trait::async_trait]
pub trait FlowTask: Send + Sync {
    /// The task name, for logs.
    fn name(&self) -> &'static str;
    /// Store keys the task reads.
    fn requires(&self) -> &[&'static str] {
        &[]
    }
    /// Store keys the task writes.
    fn provides(&self) -> &[&'static str] {
        &[]
    }
    /// Do the work. Outputs land in the store under the declared `provides`
    /// keys.
    async fn execute(&self, registry: &Registry, store: &mut FlowStore) -> Result<(), SvcError>;
    /// Undo the work after a later task failed. Must be idempotent; a revert
    /// failure is logged by the engine and never propagated.
    async fn revert(
        &self,
        registry: &Registry,
        store: &mut FlowStore,
        error: &SvcError,
    ) -> Result<(), SvcError> {
        let _ = (registry, store, error);
        Ok(())
    }
}

/// An ordered list of tasks which run against one store.
pub struct Flow {
    name: &'static str,
    tasks: Vec<Box<dyn FlowTask>>,
}

impl Flow {
    /// A new empty flow.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            tasks: Vec::new(),
        }
    }

    /// Append a task.
    pub fn with_task(mut self, task: impl FlowTask + 'static) -> Self {
        self.tasks.push(Box::new(task));
        self
    }

    /// The flow name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Resolve the execution order: repeatedly schedule the first task (by
    /// insertion order) whose requires are all available.
    fn schedule(&self, initial: &HashSet<&'static str>) -> Result<Vec<usize>, SvcError> {
        let mut available = initial.clone();
        let mut scheduled = vec![false; self.tasks.len()];
        let mut order = Vec::with_capacity(self.tasks.len());
        while order.len() < self.tasks.len() {
            let ready = (0 .. self.tasks.len()).find(|&index| {
                !scheduled[index]
                    && self.tasks[index]
                        .requires()
                        .iter()
                        .all(|key| available.contains(key))
            });
            match ready {
                Some(index) => {
                    scheduled[index] = true;
                    available.extend(self.tasks[index].provides().iter().copied());
                    order.push(index);
                }
                None => {
                    // name the first unsatisfiable input for the error
                    let missing = self
                        .tasks
                        .iter()
                        .enumerate()
                        .filter(|(index, _)| !scheduled[*index])
                        .find_map(|(_, task)| {
                            task.requires()
                                .iter()
                                .find(|key| !available.contains(*key))
                                .copied()
                        })
                        .unwrap_or_default();
                    return Err(SvcError::FlowInput {
                        flow: self.name.to_string(),
                        key: missing.to_string(),
                    });
                }
            }
        }
        Ok(order)
    }

    /// Run the flow to completion, or revert the completed prefix in reverse
    /// completion order on the first failure, which is then returned.
    pub async fn run(&self, registry: &Registry, store: &mut FlowStore) -> Result<(), SvcError> {
        store.flow = self.name;
        let initial: HashSet<&'static str> = store.keys().collect();
        let order = self.schedule(&initial)?;

        let mut completed: Vec<usize> = Vec::with_capacity(order.len());
        for index in order {
            let task = &self.tasks[index];
            tracing::debug!(flow = self.name, task = task.name(), "Executing flow task");
            match task.execute(registry, store).await {
                Ok(()) => completed.push(index),
                Err(error) => {
                    tracing::warn!(
                        flow = self.name,
                        task = task.name(),
                        error = %error,
                        "Flow task failed, reverting completed tasks"
                    );
                    for &done in completed.iter().rev() {
                        let task = &self.tasks[done];
                        if let Err(revert_error) = task.revert(registry, store, &error).await {
                            tracing::error!(
                                flow = self.name,
                                task = task.name(),
                                error = %revert_error,
                                "Ignoring revert failure"
                            );
                        }
                    }
                    return Err(error);
                }
            }
        }
        Ok(())
    }
}
