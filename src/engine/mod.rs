//! The session engine: state, the thread that owns it, and its outputs.

pub mod handoff;
pub mod input;
pub mod observer;
pub mod report;
pub mod runner;
mod sync_engine;

pub use handoff::PendingHandoff;
pub use input::{EngineInput, UserCommand};
pub use observer::{
    ChannelObserver, ChapterAccepted, CollectorObserver, EngineEvent, EngineObserver,
    LogObserver, NullObserver, StallReport, Subscribers, WordChanged,
};
pub use report::{CollectingReporter, ErrorReporter, LogReporter};
pub use runner::{EngineHandle, InputSender};
pub use sync_engine::{EngineConfig, SyncEngine};
