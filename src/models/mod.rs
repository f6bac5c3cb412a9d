// Domain models for the workflow engine.
//
// These types are plain data: serializable, storage-agnostic, and mostly
// free of engine logic. A handful of invariant checks live directly on the
// types that own the invariant (`Workflow::validate`,
// `ExecutionState::set_step_status`) because that is where a reader expects
// to find them; everything else belongs to the engine modules.

pub mod execution;
pub mod knowledge;
pub mod state;
pub mod step;
pub mod workflow;

pub use execution::{Execution, ExecutionStatus, StepExecution, StepStatus};
pub use knowledge::{DocumentCategory, KnowledgeBase, KnowledgeDocument, VectorEntry};
pub use state::{Checkpoint, ErrorEntry, ExecutionState, RouterDecision};
pub use step::{
    ApiCallConfig, ApprovalConfig, AuthConfig, CacheConfig, ConditionConfig, DataTransformConfig,
    LlmCallConfig, NotificationConfig, NotificationKind, ResponseTransform, RetryConfig, Step,
    StepConfig, StepType, TransformRule,
};
pub use workflow::{Workflow, WorkflowMetadata, WorkflowStatus};
