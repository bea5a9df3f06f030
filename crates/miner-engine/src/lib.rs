//! Template polling, worker pool, and accelerator plumbing that turns a
//! live node connection into a running search for a valid block.

pub mod accelerator;
pub mod coordinator;
pub mod template;
pub mod worker;

pub use accelerator::{Accelerator, AcceleratorError, CpuAccelerator, ScanResult, SubprocessAccelerator};
pub use coordinator::{
    CoordinatorError, CoordinatorEvent, SearchCoordinator, SearchSubspace, SweepStrategy,
    WorkerCommand, WorkerEvent, WorkerPhase, WorkerSnapshot,
};
pub use template::{
    header_skeleton, EngineTemplate, TemplateError, TemplateManager, TemplatePhase, TemplateUpdate,
};
