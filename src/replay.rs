//! Recorded sessions and deterministic playback simulation.
//!
//! A script is a JSON Lines file of server frames, exactly as the server
//! would send them. Replaying it drives a [`SyncEngine`] on a virtual clock
//! with a simulated player that only advances while audio is available.

use crate::chapters::{ChapterPipeline, PipelineConfig};
use crate::channel::{ChapterReady, ClientRequest, RecordingChannel, ServerMessage};
use crate::engine::{
    CollectorObserver, EngineConfig, EngineEvent, EngineInput, EngineObserver, StallReport,
    Subscribers, SyncEngine, UserCommand,
};
use crate::error::{EngineError, Result};
use crate::player::{MediaPlayer, PlayerSignal};
use crate::session::LifecycleState;
use crate::timeline::WordTimeline;
use anyhow::Context;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const DEFAULT_MANIFEST_PATH: &str = "/stream.m3u8";

/// Server frames for one piece of content.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Script {
    pub content_id: String,
    pub manifest_path: Option<String>,
    pub chapters: BTreeMap<u32, ChapterReady>,
    /// The script ends with `session_complete`.
    pub complete: bool,
}

impl Script {
    /// Parse JSON Lines. Blank lines and `#` comments are skipped.
    pub fn parse(content_id: &str, text: &str) -> Result<Self> {
        let mut script = Script {
            content_id: content_id.to_string(),
            ..Script::default()
        };

        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let message = ServerMessage::from_json(line)
                .map_err(|e| EngineError::Other(format!("line {}: {}", line_no + 1, e)))?;
            match message {
                ServerMessage::ChapterReady(chapter) => match chapter.chapter_number {
                    Some(number) => {
                        script.chapters.insert(number, chapter);
                    }
                    None => tracing::warn!(line = line_no + 1, "chapter without number skipped"),
                },
                ServerMessage::ManifestReady {
                    primary_playlist_path,
                    ..
                } => script.manifest_path = Some(primary_playlist_path),
                ServerMessage::SessionComplete => script.complete = true,
                ServerMessage::Error { message } => {
                    tracing::warn!(line = line_no + 1, error = %message, "server error frame skipped")
                }
            }
        }
        Ok(script)
    }

    /// Read a script file; the content id is the file stem.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read script {}", path.display()))?;
        let content_id = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "content".to_string());
        Self::parse(&content_id, &text)
            .with_context(|| format!("Failed to parse script {}", path.display()))
    }

    /// Merge every chapter in order, reporting the ones that are rejected.
    pub fn build_timeline(
        &self,
        config: PipelineConfig,
    ) -> (ChapterPipeline, WordTimeline, Vec<EngineError>) {
        let mut pipeline = ChapterPipeline::new(config);
        let mut timeline = WordTimeline::new();
        let mut rejected = Vec::new();

        for chapter in self.chapters.values() {
            let result = chapter
                .clone()
                .into_payload()
                .and_then(|payload| pipeline.on_chapter_received(payload, &mut timeline));
            if let Err(e) = result {
                rejected.push(e);
            }
        }
        (pipeline, timeline, rejected)
    }
}

/// Simulation settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplayOptions {
    /// Virtual time between position ticks.
    pub tick: Duration,
    /// Force one stall when playback reaches this position.
    pub stall_at: Option<f64>,
    /// Upper bound on simulation steps.
    pub max_steps: usize,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(100),
            stall_at: None,
            max_steps: 1_000_000,
        }
    }
}

/// What happened during a replay.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplaySummary {
    pub final_state: LifecycleState,
    pub final_position: f64,
    pub virtual_elapsed: Duration,
    pub steps: usize,
    pub events: Vec<EngineEvent>,
}

impl ReplaySummary {
    pub fn words_highlighted(&self) -> usize {
        self.count(|event| matches!(event, EngineEvent::WordChanged(_)))
    }

    pub fn chapters_requested(&self) -> Vec<u32> {
        self.events
            .iter()
            .filter_map(|event| match event {
                EngineEvent::ChapterRequested { chapter_number } => Some(*chapter_number),
                _ => None,
            })
            .collect()
    }

    pub fn stalls(&self) -> usize {
        self.count(|event| matches!(event, EngineEvent::Stall(StallReport::Started { .. })))
    }

    pub fn unrecovered_stalls(&self) -> usize {
        self.count(|event| matches!(event, EngineEvent::Stall(StallReport::Unrecovered { .. })))
    }

    fn count(&self, predicate: impl Fn(&EngineEvent) -> bool) -> usize {
        self.events.iter().filter(|event| predicate(event)).count()
    }
}

#[derive(Debug, Default)]
struct SimState {
    playing: bool,
    loaded: Option<String>,
}

/// Player whose transport state the simulation inspects.
#[derive(Debug, Clone, Default)]
struct SimPlayer {
    state: Arc<Mutex<SimState>>,
}

impl SimPlayer {
    fn with_state<T>(&self, f: impl FnOnce(&mut SimState) -> T) -> Result<T> {
        let mut state = self.state.lock().map_err(|_| EngineError::Player {
            message: "simulated player state poisoned".to_string(),
        })?;
        Ok(f(&mut state))
    }

    fn is_playing(&self) -> bool {
        self.with_state(|state| state.playing).unwrap_or(false)
    }

    fn halt(&self) {
        if self.with_state(|state| state.playing = false).is_err() {
            tracing::debug!("simulated player unavailable");
        }
    }
}

impl MediaPlayer for SimPlayer {
    fn play(&mut self) -> Result<()> {
        self.with_state(|state| {
            if state.loaded.is_some() {
                state.playing = true;
            }
        })
    }

    fn pause(&mut self) -> Result<()> {
        self.with_state(|state| state.playing = false)
    }

    fn load(&mut self, url: &str) -> Result<()> {
        self.with_state(|state| state.loaded = Some(url.to_string()))
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

/// Play `script` from start to finish on a virtual clock.
///
/// Chapters are delivered after their recorded generation latency once the
/// engine requests them. `observer` sees every event as it happens.
pub fn replay(
    script: &Script,
    config: EngineConfig,
    options: ReplayOptions,
    observer: Box<dyn EngineObserver>,
) -> ReplaySummary {
    let player = SimPlayer::default();
    let channel = RecordingChannel::new();
    let collector = CollectorObserver::new();
    let subscribers = Subscribers::new()
        .with(Box::new(collector.clone()))
        .with(observer);
    let mut engine = SyncEngine::new(config, Box::new(player.clone()), Box::new(channel.clone()))
        .with_observer(Box::new(subscribers));

    let start = Instant::now();
    let mut elapsed = Duration::ZERO;
    let mut seen_requests = 0;
    let mut in_flight: Vec<(Duration, u32)> = Vec::new();
    let mut position = 0.0_f64;
    let mut started = false;
    let mut forced_stall_done = false;
    let mut complete_sent = false;
    let mut steps = 0;

    engine.start_session(1, &script.content_id);
    let manifest = script
        .manifest_path
        .clone()
        .unwrap_or_else(|| DEFAULT_MANIFEST_PATH.to_string());
    engine.handle(
        EngineInput::Server(ServerMessage::ManifestReady {
            primary_playlist_path: manifest,
            subtitles_playlist_path: None,
        }),
        start,
    );
    engine.handle(EngineInput::Player(PlayerSignal::ReadyToPlay), start);

    while steps < options.max_steps {
        steps += 1;
        let now = start + elapsed;

        for request in channel.requests().into_iter().skip(seen_requests) {
            seen_requests += 1;
            if let ClientRequest::RequestNextChapter { chapter_number, .. } = request {
                match script.chapters.get(&chapter_number) {
                    Some(chapter) => {
                        let latency = chapter
                            .generation_latency_seconds
                            .filter(|l| l.is_finite() && *l >= 0.0)
                            .unwrap_or(0.0);
                        in_flight.push((elapsed + Duration::from_secs_f64(latency), chapter_number));
                    }
                    None => tracing::debug!(chapter = chapter_number, "script has no such chapter"),
                }
            }
        }

        let (due, waiting): (Vec<_>, Vec<_>) =
            in_flight.into_iter().partition(|(at, _)| *at <= elapsed);
        in_flight = waiting;
        for (_, number) in due {
            if let Some(chapter) = script.chapters.get(&number) {
                engine.handle(
                    EngineInput::Server(ServerMessage::ChapterReady(chapter.clone())),
                    now,
                );
            }
        }

        if script.complete && !complete_sent && engine.pipeline().last_chapter_reached() {
            complete_sent = true;
            engine.handle(EngineInput::Server(ServerMessage::SessionComplete), now);
        }

        if !started && engine.pipeline().chapter_count() > 0 {
            started = true;
            engine.handle(EngineInput::User(UserCommand::Play), now);
        }

        engine.on_deadline(now);
        if engine.state().is_terminal() {
            break;
        }
        // Nothing left to play and nothing coming.
        let idle = !player.is_playing() && in_flight.is_empty() && engine.next_deadline().is_none();
        if idle && (started || seen_requests > 0) {
            tracing::debug!(state = %engine.state(), position, "replay ran out of input");
            break;
        }

        if player.is_playing() {
            let available = engine.pipeline().durations_so_far();
            if let Some(stall_at) = options.stall_at
                && !forced_stall_done
                && position >= stall_at
            {
                forced_stall_done = true;
                player.halt();
                engine.handle(EngineInput::Player(PlayerSignal::Stalled), now);
            } else if position >= available {
                player.halt();
                engine.handle(EngineInput::Player(PlayerSignal::EndOfMedia), now);
            } else {
                position = (position + options.tick.as_secs_f64()).min(available);
                engine.handle(EngineInput::Player(PlayerSignal::PositionTick(position)), now);
            }
        }

        elapsed += options.tick;
    }

    ReplaySummary {
        final_state: engine.state(),
        final_position: position,
        virtual_elapsed: elapsed,
        steps,
        events: collector.events(),
    }
}
