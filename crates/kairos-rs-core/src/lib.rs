//! Kairos core: directive parsing and execution, debouncing, the message
//! pipeline, and the heartbeat loop.
//!
//! Durable state lives in `kairos-rs-store`; this crate ties it to the model
//! and messenger collaborators defined in `kairos-rs-protocol`.

pub mod chunking;
pub mod commands;
pub mod context;
pub mod daily_log;
pub mod debounce;
pub mod directives;
pub mod error;
pub mod heartbeat;
pub mod pipeline;
pub mod retry;
pub mod services;
pub mod skills;
pub mod status;
pub mod system_status;

pub use chunking::chunk_message;
pub use commands::{ApplyReport, DirectiveExecutor, DirectiveOutcome};
pub use context::{ContextBuilder, ContextSettings};
pub use daily_log::DailyLog;
pub use debounce::{BatchHandler, Debouncer, InboundMessage, MessageBatch};
pub use directives::{Directive, DirectiveError, ParsedReply, ScheduleSpec, parse_reply};
pub use error::KairosCoreError;
pub use heartbeat::{
    ActiveWindow, Heartbeat, HeartbeatSettings, HeartbeatState, TickOutcome, TickReport,
    parse_action,
};
pub use pipeline::{InboundFilter, MessagePipeline};
pub use retry::{RetryPolicy, RetryingMessenger, RetryingModel};
pub use services::{EMPTY_REPLY, Reply, Services};
pub use skills::{Skill, SkillLibrary};
pub use status::StatusWriter;
pub use system_status::{StaticStatus, SysinfoStatus, SystemStatusProvider};
