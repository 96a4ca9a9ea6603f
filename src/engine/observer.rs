//! Typed notifications published by the engine.

use crate::session::StateChange;
use crossbeam_channel::{Receiver, Sender, bounded};
use serde::Serialize;
use std::sync::{Arc, Mutex};

/// The highlighted word moved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WordChanged {
    pub index: usize,
    pub text: String,
    pub chapter_number: u32,
    pub start: f64,
    pub end: f64,
}

/// A chapter was merged into the timeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChapterAccepted {
    pub number: u32,
    pub title: Option<String>,
    pub start_offset: f64,
    pub duration: f64,
    pub word_count: usize,
    pub is_last: bool,
    pub next_prefetch_threshold: Option<f64>,
}

/// Outcome of a stall episode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StallReport {
    Started { position: Option<f64> },
    Recovered { position: Option<f64> },
    Unrecovered { position: f64 },
}

/// Everything the engine publishes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    WordChanged(WordChanged),
    StateChanged(StateChange),
    ChapterBoundary { chapter_number: u32 },
    ChapterAccepted(ChapterAccepted),
    ChapterRequested { chapter_number: u32 },
    Stall(StallReport),
}

/// Receives engine notifications on the engine thread.
///
/// Override the typed hooks you care about, or `on_event` to see everything.
/// Implementations must not block.
pub trait EngineObserver: Send + 'static {
    fn on_word_changed(&mut self, _word: &WordChanged) {}

    fn on_state_changed(&mut self, _change: &StateChange) {}

    fn on_chapter_boundary(&mut self, _chapter_number: u32) {}

    fn on_chapter_accepted(&mut self, _chapter: &ChapterAccepted) {}

    fn on_chapter_requested(&mut self, _chapter_number: u32) {}

    fn on_stall_report(&mut self, _report: &StallReport) {}

    fn on_event(&mut self, event: &EngineEvent) {
        match event {
            EngineEvent::WordChanged(word) => self.on_word_changed(word),
            EngineEvent::StateChanged(change) => self.on_state_changed(change),
            EngineEvent::ChapterBoundary { chapter_number } => {
                self.on_chapter_boundary(*chapter_number)
            }
            EngineEvent::ChapterAccepted(chapter) => self.on_chapter_accepted(chapter),
            EngineEvent::ChapterRequested { chapter_number } => {
                self.on_chapter_requested(*chapter_number)
            }
            EngineEvent::Stall(report) => self.on_stall_report(report),
        }
    }
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl EngineObserver for NullObserver {}

/// Fans every event out to several observers, in subscription order.
#[derive(Default)]
pub struct Subscribers {
    observers: Vec<Box<dyn EngineObserver>>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, observer: Box<dyn EngineObserver>) {
        self.observers.push(observer);
    }

    pub fn with(mut self, observer: Box<dyn EngineObserver>) -> Self {
        self.subscribe(observer);
        self
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl EngineObserver for Subscribers {
    fn on_event(&mut self, event: &EngineEvent) {
        for observer in &mut self.observers {
            observer.on_event(event);
        }
    }
}

/// Records every event. Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct CollectorObserver {
    events: Arc<Mutex<Vec<EngineEvent>>>,
}

impl CollectorObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Word indices in notification order.
    pub fn word_indices(&self) -> Vec<usize> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                EngineEvent::WordChanged(word) => Some(word.index),
                _ => None,
            })
            .collect()
    }

    /// Target states in transition order.
    pub fn states(&self) -> Vec<crate::session::LifecycleState> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                EngineEvent::StateChanged(change) => Some(change.to),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl EngineObserver for CollectorObserver {
    fn on_event(&mut self, event: &EngineEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Forwards events over a crossbeam channel, dropping them when it is full.
pub struct ChannelObserver {
    tx: Sender<EngineEvent>,
}

impl ChannelObserver {
    pub fn new(tx: Sender<EngineEvent>) -> Self {
        Self { tx }
    }

    /// Observer plus the receiving end of a fresh bounded channel.
    pub fn with_capacity(capacity: usize) -> (Self, Receiver<EngineEvent>) {
        let (tx, rx) = bounded(capacity.max(1));
        (Self::new(tx), rx)
    }
}

impl EngineObserver for ChannelObserver {
    fn on_event(&mut self, event: &EngineEvent) {
        if self.tx.try_send(event.clone()).is_err() {
            // Channel full or closed - the UI catches up from the next event
        }
    }
}

/// Writes every event to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl EngineObserver for LogObserver {
    fn on_word_changed(&mut self, word: &WordChanged) {
        tracing::trace!(index = word.index, chapter = word.chapter_number, text = %word.text, "word changed");
    }

    fn on_state_changed(&mut self, change: &StateChange) {
        tracing::info!(from = %change.from, to = %change.to, "session state changed");
    }

    fn on_chapter_boundary(&mut self, chapter_number: u32) {
        tracing::debug!(chapter = chapter_number, "chapter boundary crossed");
    }

    fn on_chapter_accepted(&mut self, chapter: &ChapterAccepted) {
        tracing::debug!(
            chapter = chapter.number,
            offset = chapter.start_offset,
            duration = chapter.duration,
            words = chapter.word_count,
            "chapter accepted"
        );
    }

    fn on_chapter_requested(&mut self, chapter_number: u32) {
        tracing::debug!(chapter = chapter_number, "chapter requested");
    }

    fn on_stall_report(&mut self, report: &StallReport) {
        match report {
            StallReport::Unrecovered { position } => {
                tracing::warn!(position, "stall not recovered")
            }
            other => tracing::debug!(?other, "stall report"),
        }
    }
}
