//! Record types that can be saved to the persistent store, together with the
//! operation-log transaction machinery which makes every record mutation a
//! two-phase commit: log the intent, do the work, then commit or clear.

/// Volume attachment records.
pub mod attachment;
/// Volume snapshot records.
pub mod snapshot;
/// Volume records and their operation log.
pub mod volume;
/// Volume type records.
pub mod volume_type;

use serde::{Deserialize, Serialize};

/// Transaction operations for a spec.
/// `start_op` logs the intent (and applies the operation's entry transitions,
/// e.g. flagging a volume as migrating), `commit_op` applies the operation's
/// effect and clears the log, `clear_op` applies the operation's failure
/// transitions and clears the log.
pub trait SpecTransaction<Operation> {
    /// Check for a pending operation.
    fn pending_op(&self) -> bool;
    /// Commit the operation to the spec and clear it.
    fn commit_op(&mut self);
    /// Clear the operation, applying its failure transitions.
    fn clear_op(&mut self);
    /// Add a new pending operation.
    fn start_op(&mut self, operation: Operation);
    /// Sets the result of the operation.
    fn set_op_result(&mut self, result: bool);
}

/// Serializes user operations on a resource without holding its lock.
/// Mutating operations on the same resource id take this sequence exclusively
/// for their whole duration; a busy sequence means "try again later".
#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct OperationSequence {
    uuid: String,
    state: OperationSequenceState,
}
impl OperationSequence {
    /// Create new `Self` with a uuid for observability.
    pub fn new(uuid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            state: Default::default(),
        }
    }
    /// The identifier of the sequenced resource.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }
    /// Try to take the sequence exclusively.
    pub fn sequence(&mut self) -> bool {
        if self.state == OperationSequenceState::Idle {
            self.state = OperationSequenceState::Busy;
            true
        } else {
            false
        }
    }
    /// Release the sequence.
    pub fn complete(&mut self) {
        debug_assert!(self.state == OperationSequenceState::Busy, "{self:?}");
        self.state = OperationSequenceState::Idle;
    }
}

/// Sequence states.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum OperationSequenceState {
    /// No operation in progress.
    #[default]
    Idle,
    /// An exclusive operation is in progress.
    Busy,
}

/// Implemented by resources which embed an `OperationSequence`.
pub trait AsOperationSequencer {
    /// Borrow the sequence.
    fn as_ref(&self) -> &OperationSequence;
    /// Borrow the sequence mutably.
    fn as_mut(&mut self) -> &mut OperationSequence;
}

/// Taking and releasing the operation sequence through a shared handle.
pub trait OperationSequencer: std::fmt::Debug + Clone {
    /// Try to take the sequence exclusively.
    fn sequence(&self) -> bool;
    /// Release the sequence.
    fn complete(&self);
}
