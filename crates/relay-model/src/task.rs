use crate::error::RelayError;

/// The source query bound into the stored-procedure call: which columns to
/// read, which relation to read them from, and which column is the primary
/// key.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub from: String,
    pub columns: String,
    pub pk_column: String,
}

impl Query {
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.from.is_empty() {
            return Err(RelayError::Config("query.from is required".into()));
        }
        if self.columns.is_empty() {
            return Err(RelayError::Config("query.columns is required".into()));
        }
        if self.pk_column.is_empty() {
            return Err(RelayError::Config("query.pk_column is required".into()));
        }
        Ok(())
    }
}

/// One worker's slice of a logical table: which group/partition it owns, how
/// many rows to request per poll, and where to publish.
#[derive(Debug, Clone, Default)]
pub struct Task {
    pub group_id: String,
    pub part_id: i32,
    pub batch_size: i32,
    pub topic: String,
    pub query: Query,
}

impl Task {
    /// `task_<group_id>_<part_id>`, used to tag every log line and metric
    /// produced while this shard is running.
    pub fn tag(&self) -> String {
        format!("task_{}_{}", self.group_id, self.part_id)
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        if self.topic.is_empty() {
            return Err(RelayError::Config("topic is required".into()));
        }
        if self.group_id.is_empty() {
            return Err(RelayError::Config("group_id is required".into()));
        }
        if self.batch_size <= 0 {
            return Err(RelayError::Config("batch_size must be > 0".into()));
        }
        self.query.validate()
    }
}
