//! relay-router
//!
//! Expands the task-name -> task-config map from configuration into one
//! `Task` per (task, partition index) pair, validates every shard up front,
//! and wraps each into a handler the Runner can schedule without knowing
//! anything about tasks, topics or the relay service itself.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use relay_config::TaskConfig;
use relay_model::{Query, Task};
use relay_service::Relayer;

/// What the Runner schedules: a tagged, zero-argument, idempotent unit of
/// work that reports whether it progressed.
#[async_trait]
pub trait ShardHandler: Send + Sync {
    fn tag(&self) -> &str;
    async fn call(&self) -> (bool, anyhow::Result<()>);
}

struct RelayShardHandler {
    tag: String,
    task: Task,
    relayer: Arc<dyn Relayer>,
}

#[async_trait]
impl ShardHandler for RelayShardHandler {
    fn tag(&self) -> &str {
        &self.tag
    }

    async fn call(&self) -> (bool, anyhow::Result<()>) {
        match self.relayer.relay(&self.task).await {
            Ok(count) => (count > 0, Ok(())),
            Err(e) => (false, Err(e)),
        }
    }
}

/// Expand `tasks` into shard `Task` values, one per partition. Fails the
/// whole call (aborting startup) if any shard does not validate.
pub fn expand_tasks(tasks: &BTreeMap<String, TaskConfig>) -> anyhow::Result<Vec<Task>> {
    let mut shards = Vec::new();

    for (name, cfg) in tasks {
        for part_id in 0..cfg.part_count {
            let task = Task {
                group_id: cfg.group_id.clone(),
                part_id: part_id as i32,
                batch_size: cfg.batch_size,
                topic: cfg.topic.clone(),
                query: Query {
                    from: cfg.query.from.clone(),
                    columns: cfg.query.columns.clone(),
                    pk_column: cfg.query.pk_column.clone(),
                },
            };
            task.validate()
                .map_err(|e| anyhow::anyhow!("router - task {name} shard {part_id}: {e}"))?;
            shards.push(task);
        }
    }

    Ok(shards)
}

/// Build one handler per shard task, wrapping calls to `relayer`.
pub fn route(
    relayer: Arc<dyn Relayer>,
    tasks: &BTreeMap<String, TaskConfig>,
) -> anyhow::Result<Vec<Box<dyn ShardHandler>>> {
    let shards = expand_tasks(tasks)?;
    Ok(shards
        .into_iter()
        .map(|task| {
            let tag = task.tag();
            Box::new(RelayShardHandler { tag, task, relayer: relayer.clone() }) as Box<dyn ShardHandler>
        })
        .collect())
}
