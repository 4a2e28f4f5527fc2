pub mod chain;
pub mod mailbox;
pub mod registry;
pub mod save;
pub mod worker;

pub use chain::{aggregate_status, run_display, ChainOutput, StageStatus};
pub use mailbox::{Mailbox, MailboxStats};
pub use registry::{ActiveStage, ProcessorDescriptor, ProcessorRegistry, Snapshot};
pub use save::{capture_still, persist, SavePath, SavedOutput};
pub use worker::{
    DisplayMailbox, DisplayUpdate, FramePipeline, FrameSubmitter, PipelineEvent, PipelineStats,
};
