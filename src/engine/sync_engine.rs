//! The single-threaded session engine.
//!
//! `SyncEngine` owns all session state and is driven one input at a time by
//! the runner thread (or directly by tests and the replay command). Time is
//! passed in explicitly, so the engine itself never sleeps or reads a clock.

use super::handoff::PendingHandoff;
use super::input::{EngineInput, UserCommand};
use super::observer::{
    ChapterAccepted, EngineEvent, EngineObserver, NullObserver, StallReport, WordChanged,
};
use super::report::{ErrorReporter, LogReporter};
use crate::chapters::{ChapterPayload, ChapterPipeline, PipelineConfig};
use crate::channel::{ChapterReady, ClientRequest, MessageChannel, ServerMessage};
use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::player::{MediaPlayer, PlayerCommand, PlayerSignal};
use crate::session::{LifecycleState, SessionEvent, SessionMachine, SessionSnapshot, StateChange};
use crate::stall::{StallAction, StallConfig, StallSupervisor};
use crate::sync::{IndexChange, PositionSynchronizer, SyncConfig, TickOutcome};
use crate::timeline::WordTimeline;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Everything the engine needs to know up front.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub pipeline: PipelineConfig,
    pub sync: SyncConfig,
    pub stall: StallConfig,
    pub want_audio: bool,
    /// Prefix for the manifest path the server returns.
    pub manifest_base_url: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            sync: SyncConfig::default(),
            stall: StallConfig::default(),
            want_audio: crate::defaults::WANT_AUDIO,
            manifest_base_url: None,
        }
    }
}

impl From<&Config> for EngineConfig {
    fn from(config: &Config) -> Self {
        Self {
            pipeline: PipelineConfig {
                prefetch_floor: config.engine.prefetch_floor_secs,
            },
            sync: SyncConfig {
                tick_epsilon: config.engine.tick_epsilon_secs,
                marker_epsilon: config.engine.marker_epsilon_secs,
                ..SyncConfig::default()
            },
            stall: StallConfig {
                verify_delay: Duration::from_millis(config.stall.verify_delay_ms),
                cycle_delay: Duration::from_millis(config.stall.cycle_delay_ms),
                advance_epsilon: config.stall.advance_epsilon_secs,
            },
            want_audio: config.engine.want_audio,
            manifest_base_url: config.engine.manifest_base_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StallTimer {
    due: Instant,
    episode: u64,
}

pub struct SyncEngine {
    config: EngineConfig,
    player: Box<dyn MediaPlayer>,
    channel: Box<dyn MessageChannel>,
    observer: Box<dyn EngineObserver>,
    reporter: Arc<dyn ErrorReporter>,
    epoch: u64,
    content_id: Option<String>,
    machine: SessionMachine,
    pipeline: ChapterPipeline,
    timeline: WordTimeline,
    sync: PositionSynchronizer,
    stall: StallSupervisor,
    handoff: PendingHandoff<ChapterPayload>,
    timers: Vec<StallTimer>,
}

impl SyncEngine {
    pub fn new(
        config: EngineConfig,
        player: Box<dyn MediaPlayer>,
        channel: Box<dyn MessageChannel>,
    ) -> Self {
        Self {
            pipeline: ChapterPipeline::new(config.pipeline),
            sync: PositionSynchronizer::new(config.sync),
            stall: StallSupervisor::new(config.stall),
            config,
            player,
            channel,
            observer: Box::new(NullObserver),
            reporter: Arc::new(LogReporter),
            epoch: 0,
            content_id: None,
            machine: SessionMachine::new(),
            timeline: WordTimeline::new(),
            handoff: PendingHandoff::new(),
            timers: Vec::new(),
        }
    }

    pub fn with_observer(mut self, observer: Box<dyn EngineObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn state(&self) -> LifecycleState {
        self.machine.state()
    }

    pub fn content_id(&self) -> Option<&str> {
        self.content_id.as_deref()
    }

    pub fn timeline(&self) -> &WordTimeline {
        &self.timeline
    }

    pub fn pipeline(&self) -> &ChapterPipeline {
        &self.pipeline
    }

    pub fn current_word_index(&self) -> Option<usize> {
        self.sync.current_index()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start a session for `content_id`, discarding whatever came before.
    ///
    /// Requests the manifest and the first chapter.
    pub fn start_session(&mut self, epoch: u64, content_id: &str) {
        self.clear();
        self.epoch = epoch;
        self.content_id = Some(content_id.to_string());
        tracing::info!(epoch, content_id, "session started");

        self.transition(SessionEvent::Start);
        let manifest = ClientRequest::RequestStreamingManifest {
            content_id: content_id.to_string(),
        };
        if self.send(manifest).is_ok() {
            self.pipeline.mark_requested(1);
            self.request_chapter(1);
        }
    }

    /// Tear the session down. Inputs stamped with older epochs are dropped by
    /// the runner from now on.
    pub fn end_session(&mut self, epoch: u64) {
        if let Some(content_id) = &self.content_id {
            tracing::info!(epoch = self.epoch, content_id, "session ended");
        }
        self.clear();
        self.epoch = epoch;
    }

    /// Process one input.
    pub fn handle(&mut self, input: EngineInput, now: Instant) {
        if self.content_id.is_none() {
            tracing::debug!(?input, "no active session, input dropped");
            return;
        }
        if self.machine.state().is_terminal() {
            tracing::trace!(?input, state = %self.machine.state(), "session over, input dropped");
            return;
        }

        match input {
            EngineInput::Server(message) => self.on_server_message(message, now),
            EngineInput::TransportFailed { message } => {
                self.fail("channel", EngineError::Transport { message })
            }
            EngineInput::Player(signal) => self.on_player_signal(signal, now),
            EngineInput::User(command) => self.on_user_command(command),
        }
    }

    /// Earliest pending stall check, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        let episode = self.stall.episode();
        self.timers
            .iter()
            .filter(|timer| timer.episode == episode)
            .map(|timer| timer.due)
            .min()
    }

    /// Fire every stall check due at `now`.
    pub fn on_deadline(&mut self, now: Instant) {
        let episode = self.stall.episode();
        self.timers.retain(|timer| timer.episode == episode);

        let mut due: Vec<StallTimer> = Vec::new();
        self.timers.retain(|timer| {
            if timer.due <= now {
                due.push(*timer);
                false
            } else {
                true
            }
        });
        due.sort_by_key(|timer| timer.due);

        for timer in due {
            let actions = self.stall.on_timer(timer.episode);
            self.apply_stall_actions(actions, now);
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            epoch: self.epoch,
            content_id: self.content_id.clone(),
            lifecycle: self.machine.state(),
            current_chapter_number: self.pipeline.current_chapter_number(),
            requested_chapter_numbers: self.pipeline.requested().clone(),
            durations_so_far: self.pipeline.durations_so_far(),
            next_prefetch_threshold: self.pipeline.next_prefetch_threshold(),
            last_chapter_reached: self.pipeline.last_chapter_reached(),
            is_stalled: self.stall.is_stalled(),
            current_word_index: self.sync.current_index(),
            word_count: self.timeline.len(),
            chapter_count: self.pipeline.chapter_count(),
        }
    }

    fn clear(&mut self) {
        let from = self.machine.state();
        self.machine.reset();
        self.pipeline.reset();
        self.timeline.clear();
        self.sync.reset();
        self.stall.reset();
        self.handoff.reset();
        self.timers.clear();
        self.content_id = None;
        if from != LifecycleState::Idle {
            self.emit(EngineEvent::StateChanged(StateChange {
                from,
                to: LifecycleState::Idle,
            }));
        }
    }

    fn on_server_message(&mut self, message: ServerMessage, now: Instant) {
        match message {
            ServerMessage::ChapterReady(chapter) => self.on_chapter_ready(chapter, now),
            ServerMessage::ManifestReady {
                primary_playlist_path,
                ..
            } => self.on_manifest_ready(&primary_playlist_path),
            ServerMessage::SessionComplete => {
                tracing::debug!("server reports no further chapters");
                self.pipeline.mark_complete();
            }
            ServerMessage::Error { message } => {
                self.fail("server", EngineError::Transport { message })
            }
        }
    }

    fn on_chapter_ready(&mut self, chapter: ChapterReady, now: Instant) {
        let payload = match chapter.into_payload() {
            Ok(payload) => payload,
            Err(e) => {
                self.reporter.report("protocol", &e);
                return;
            }
        };
        match self.handoff.offer(payload) {
            Some(payload) => self.accept_chapter(payload, now),
            None => tracing::debug!(held = self.handoff.held(), "chapter held until player is ready"),
        }
    }

    fn accept_chapter(&mut self, payload: ChapterPayload, now: Instant) {
        let title = payload.title.clone();
        let duration = payload.duration;

        let accepted = match self.pipeline.on_chapter_received(payload, &mut self.timeline) {
            Ok(accepted) => accepted,
            Err(e) => {
                self.reporter.report("pipeline", &e);
                return;
            }
        };
        tracing::info!(
            chapter = accepted.number,
            offset = accepted.start_offset,
            duration,
            words = accepted.words.len(),
            "chapter accepted"
        );
        self.emit(EngineEvent::ChapterAccepted(ChapterAccepted {
            number: accepted.number,
            title,
            start_offset: accepted.start_offset,
            duration,
            word_count: accepted.words.len(),
            is_last: accepted.is_last,
            next_prefetch_threshold: accepted.next_prefetch_threshold,
        }));
        self.transition(SessionEvent::ChapterArrived);

        let actions = self.stall.on_chapter_ready();
        self.apply_stall_actions(actions, now);

        // Playback may already be past the new chapter's threshold.
        if let Some(t) = self.sync.last_processed()
            && let Some(next) = self.pipeline.request_next_chapter_if_due(t)
        {
            self.request_chapter(next);
        }
    }

    fn on_manifest_ready(&mut self, path: &str) {
        if self.machine.state() != LifecycleState::FetchingLinks {
            tracing::debug!(path, "manifest already loaded, ignoring");
            return;
        }
        let url = self.manifest_url(path);
        tracing::info!(url = %url, "loading manifest");
        match self.player.load(&url) {
            Ok(()) => {
                self.transition(SessionEvent::LinksFetched);
            }
            Err(e) => self.fail("player", e),
        }
    }

    fn manifest_url(&self, path: &str) -> String {
        match &self.config.manifest_base_url {
            Some(base) => format!("{base}{path}"),
            None => path.to_string(),
        }
    }

    fn on_player_signal(&mut self, signal: PlayerSignal, now: Instant) {
        match signal {
            PlayerSignal::PositionTick(t) => self.on_position_tick(t, now),
            PlayerSignal::Stalled => self.on_stalled(now),
            PlayerSignal::EndOfMedia => self.on_end_of_media(now),
            PlayerSignal::ReadyToPlay => {
                let held = self.handoff.flush();
                if !held.is_empty() {
                    tracing::debug!(count = held.len(), "player ready, releasing held chapters");
                }
                for payload in held {
                    self.accept_chapter(payload, now);
                }
            }
        }
    }

    fn on_position_tick(&mut self, t: f64, now: Instant) {
        if let Some(action) = self.stall.on_position(t) {
            self.apply_stall_actions(vec![action], now);
        }

        match self.sync.on_position_tick(t, &self.timeline) {
            TickOutcome::Debounced => return,
            TickOutcome::Unchanged => {}
            TickOutcome::Changed(change) => self.publish_word_change(change),
        }

        if let Some(next) = self.pipeline.request_next_chapter_if_due(t) {
            self.request_chapter(next);
        }
    }

    fn publish_word_change(&mut self, change: IndexChange) {
        let Some(span) = self.timeline.get(change.current) else {
            return;
        };
        let word = WordChanged {
            index: change.current,
            text: span.text.clone(),
            chapter_number: span.chapter_number,
            start: span.start,
            end: span.end,
        };
        let crossed = change
            .previous
            .and_then(|previous| self.timeline.get(previous))
            .is_some_and(|previous| previous.chapter_number != span.chapter_number);

        let chapter_number = word.chapter_number;
        self.emit(EngineEvent::WordChanged(word));
        if crossed {
            self.emit(EngineEvent::ChapterBoundary { chapter_number });
        }
    }

    fn on_stalled(&mut self, now: Instant) {
        if self.machine.state() != LifecycleState::Playing {
            tracing::debug!(state = %self.machine.state(), "stall signal ignored");
            return;
        }
        self.transition(SessionEvent::Stalled);
        self.open_stall_episode(now);
    }

    fn on_end_of_media(&mut self, now: Instant) {
        let last_chapter_reached = self.pipeline.last_chapter_reached();
        let Some(change) = self.transition(SessionEvent::EndOfMedia {
            last_chapter_reached,
        }) else {
            return;
        };
        match change.to {
            LifecycleState::Buffering => self.open_stall_episode(now),
            LifecycleState::Completed => {
                tracing::info!(
                    chapters = self.pipeline.chapter_count(),
                    duration = self.pipeline.total_duration(),
                    "session completed"
                );
                self.stall.reset();
                self.timers.clear();
            }
            _ => {}
        }
    }

    /// Start recovery bookkeeping.
    ///
    /// Audio ran out, so the next chapter is requested if that has not
    /// happened yet. With no chapter outstanding at all there is nothing to
    /// wait for and recovery starts straight away.
    fn open_stall_episode(&mut self, now: Instant) {
        if !self.stall.on_stalled() {
            return;
        }
        let position = self.sync.last_processed();
        tracing::warn!(?position, "playback stalled");
        self.emit(EngineEvent::Stall(StallReport::Started { position }));

        if !self.pipeline.last_chapter_reached() {
            let next = self.pipeline.current_chapter_number() + 1;
            if self.pipeline.mark_requested(next) {
                self.request_chapter(next);
            }
        }
        if self.pipeline.outstanding().next().is_none() {
            let actions = self.stall.on_chapter_ready();
            self.apply_stall_actions(actions, now);
        }
    }

    fn on_user_command(&mut self, command: UserCommand) {
        let event = match command {
            UserCommand::Play => SessionEvent::Play,
            UserCommand::Pause => SessionEvent::Pause,
            UserCommand::Toggle => SessionEvent::Toggle,
        };
        let Some(change) = self.transition(event) else {
            tracing::debug!(?command, state = %self.machine.state(), "user command ignored");
            return;
        };
        match change.to {
            LifecycleState::Playing => self.drive_player(PlayerCommand::Play),
            LifecycleState::Paused => {
                // User intent overrides any recovery in progress.
                self.stall.reset();
                self.timers.clear();
                self.drive_player(PlayerCommand::Pause);
            }
            _ => {}
        }
    }

    fn apply_stall_actions(&mut self, actions: Vec<StallAction>, now: Instant) {
        for action in actions {
            match action {
                StallAction::Resume => self.drive_player(PlayerCommand::Play),
                StallAction::Pause => self.drive_player(PlayerCommand::Pause),
                StallAction::ScheduleCheck { after, episode } => {
                    self.timers.push(StallTimer {
                        due: now + after,
                        episode,
                    });
                }
                StallAction::Recovered => {
                    let position = self.sync.last_processed();
                    tracing::info!(?position, "stall recovered");
                    self.emit(EngineEvent::Stall(StallReport::Recovered { position }));
                    self.transition(SessionEvent::StallCleared);
                }
                StallAction::Unrecovered { position } => {
                    self.reporter
                        .report("stall", &EngineError::StallUnrecovered { position });
                    self.emit(EngineEvent::Stall(StallReport::Unrecovered { position }));
                }
            }
        }
    }

    fn drive_player(&mut self, command: PlayerCommand) {
        let result = match &command {
            PlayerCommand::Play => self.player.play(),
            PlayerCommand::Pause => self.player.pause(),
            PlayerCommand::Load(url) => self.player.load(url),
        };
        if let Err(e) = result {
            self.reporter.report(self.player.name(), &e);
        }
    }

    fn request_chapter(&mut self, number: u32) {
        let Some(content_id) = self.content_id.clone() else {
            return;
        };
        let request = ClientRequest::RequestNextChapter {
            content_id,
            chapter_number: number,
            want_audio: self.config.want_audio,
        };
        if self.send(request).is_ok() {
            tracing::debug!(chapter = number, "chapter requested");
            self.emit(EngineEvent::ChapterRequested {
                chapter_number: number,
            });
        }
    }

    /// Send a request; a channel error ends the session.
    fn send(&mut self, request: ClientRequest) -> Result<()> {
        let result = self.channel.send(request);
        if let Err(e) = &result {
            let name = self.channel.name();
            self.fail(name, EngineError::Transport {
                message: e.to_string(),
            });
        }
        result
    }

    fn fail(&mut self, component: &str, error: EngineError) {
        self.reporter.report(component, &error);
        self.stall.reset();
        self.timers.clear();
        self.transition(SessionEvent::Fatal);
    }

    fn transition(&mut self, event: SessionEvent) -> Option<StateChange> {
        let change = self.machine.apply(event)?;
        self.emit(EngineEvent::StateChanged(change));
        Some(change)
    }

    fn emit(&mut self, event: EngineEvent) {
        self.observer.on_event(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{RecordingChannel, WireWord};
    use crate::engine::observer::CollectorObserver;
    use crate::engine::report::CollectingReporter;
    use crate::player::RecordingPlayer;
    use LifecycleState as S;

    struct Harness {
        engine: SyncEngine,
        player: RecordingPlayer,
        channel: RecordingChannel,
        events: CollectorObserver,
        reports: CollectingReporter,
        now: Instant,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_config(EngineConfig::default())
        }

        fn with_config(config: EngineConfig) -> Self {
            let player = RecordingPlayer::new();
            let channel = RecordingChannel::new();
            let events = CollectorObserver::new();
            let reports = CollectingReporter::new();
            let engine = SyncEngine::new(config, Box::new(player.clone()), Box::new(channel.clone()))
                .with_observer(Box::new(events.clone()))
                .with_reporter(Arc::new(reports.clone()));
            Self {
                engine,
                player,
                channel,
                events,
                reports,
                now: Instant::now(),
            }
        }

        fn send(&mut self, input: impl Into<EngineInput>) {
            self.engine.handle(input.into(), self.now);
        }

        fn tick(&mut self, t: f64) {
            self.send(PlayerSignal::PositionTick(t));
        }

        fn advance(&mut self, by: Duration) {
            self.now += by;
            self.engine.on_deadline(self.now);
        }

        /// Session started, manifest loaded, player ready and playing.
        fn playing() -> Self {
            let mut harness = Self::new();
            harness.engine.start_session(1, "book");
            harness.send(ServerMessage::ManifestReady {
                primary_playlist_path: "/hls/book.m3u8".to_string(),
                subtitles_playlist_path: None,
            });
            harness.send(PlayerSignal::ReadyToPlay);
            harness.send(UserCommand::Play);
            harness
        }
    }

    fn chapter(number: u32, duration: f64, latency: f64, is_last: bool) -> ServerMessage {
        ServerMessage::ChapterReady(ChapterReady {
            chapter_number: Some(number),
            title: None,
            audio_duration_seconds: Some(duration),
            generation_latency_seconds: Some(latency),
            is_last,
            words: vec![
                WireWord {
                    text: format!("c{number}a"),
                    start_seconds: 0.0,
                    end_seconds: duration / 2.0,
                },
                WireWord {
                    text: format!("c{number}b"),
                    start_seconds: duration / 2.0,
                    end_seconds: duration,
                },
            ],
        })
    }

    #[test]
    fn test_start_session_requests_manifest_and_first_chapter() {
        let mut harness = Harness::new();
        harness.engine.start_session(1, "book");

        let requests = harness.channel.requests();
        assert!(matches!(
            requests[0],
            ClientRequest::RequestStreamingManifest { .. }
        ));
        assert_eq!(harness.channel.chapter_requests(), vec![1]);
        assert_eq!(harness.engine.state(), S::FetchingLinks);
    }

    #[test]
    fn test_manifest_url_uses_base() {
        let mut harness = Harness::with_config(EngineConfig {
            manifest_base_url: Some("https://cdn.example.com".to_string()),
            ..EngineConfig::default()
        });
        harness.engine.start_session(1, "book");
        harness.send(ServerMessage::ManifestReady {
            primary_playlist_path: "/hls/book.m3u8".to_string(),
            subtitles_playlist_path: None,
        });

        assert_eq!(
            harness.player.commands(),
            vec![PlayerCommand::Load(
                "https://cdn.example.com/hls/book.m3u8".to_string()
            )]
        );
        assert_eq!(harness.engine.state(), S::Ready);
    }

    #[test]
    fn test_chapters_held_until_ready_to_play() {
        let mut harness = Harness::new();
        harness.engine.start_session(1, "book");
        harness.send(chapter(1, 100.0, 5.0, false));
        assert_eq!(harness.engine.timeline().len(), 0);

        harness.send(PlayerSignal::ReadyToPlay);
        assert_eq!(harness.engine.timeline().len(), 2);

        // Later chapters pass straight through, a second ready does nothing
        harness.send(PlayerSignal::ReadyToPlay);
        harness.send(chapter(2, 50.0, 1.0, false));
        assert_eq!(harness.engine.timeline().len(), 4);
    }

    #[test]
    fn test_prefetch_requested_once() {
        let mut harness = Harness::playing();
        harness.send(chapter(1, 100.0, 5.0, false));

        harness.tick(89.0);
        assert_eq!(harness.channel.chapter_requests(), vec![1]);
        harness.tick(90.1);
        harness.tick(95.0);
        assert_eq!(harness.channel.chapter_requests(), vec![1, 2]);
    }

    #[test]
    fn test_word_changes_and_boundary() {
        let mut harness = Harness::playing();
        harness.send(chapter(1, 10.0, 0.0, false));
        harness.send(chapter(2, 10.0, 0.0, true));

        harness.tick(1.0);
        harness.tick(6.0);
        harness.tick(11.0);

        assert_eq!(harness.events.word_indices(), vec![0, 1, 2]);
        let boundaries: Vec<_> = harness
            .events
            .events()
            .into_iter()
            .filter(|e| matches!(e, EngineEvent::ChapterBoundary { .. }))
            .collect();
        assert_eq!(boundaries, vec![EngineEvent::ChapterBoundary { chapter_number: 2 }]);
    }

    #[test]
    fn test_stall_recovery_resumes_after_chapter() {
        let mut harness = Harness::playing();
        harness.send(chapter(1, 100.0, 5.0, false));
        harness.tick(95.0);
        harness.tick(99.8);
        harness.send(PlayerSignal::Stalled);
        assert_eq!(harness.engine.state(), S::Buffering);
        assert!(harness.engine.snapshot().is_stalled);

        let before = harness.player.commands().len();
        harness.send(chapter(2, 50.0, 1.0, false));
        assert_eq!(harness.player.commands()[before], PlayerCommand::Play);
        assert!(!harness.engine.snapshot().is_stalled);

        harness.tick(100.0);
        harness.tick(100.3);
        harness.advance(Duration::from_millis(500));

        assert_eq!(harness.engine.state(), S::Playing);
        assert_eq!(harness.player.commands().len(), before + 1);
        assert!(harness.engine.next_deadline().is_none());
    }

    #[test]
    fn test_unrecovered_stall_is_reported_not_fatal() {
        let mut harness = Harness::playing();
        harness.send(chapter(1, 100.0, 5.0, false));
        harness.tick(95.0);
        harness.tick(99.8);
        harness.send(PlayerSignal::Stalled);
        harness.send(chapter(2, 50.0, 1.0, false));

        harness.advance(Duration::from_millis(500));
        harness.advance(Duration::from_millis(100));
        harness.advance(Duration::from_millis(500));

        assert_eq!(harness.engine.state(), S::Buffering);
        assert!(
            harness
                .reports
                .reports()
                .iter()
                .any(|(component, _)| component == "stall")
        );

        harness.tick(100.5);
        assert_eq!(harness.engine.state(), S::Playing);
    }

    #[test]
    fn test_end_of_media_completes_after_last_chapter() {
        let mut harness = Harness::playing();
        harness.send(chapter(1, 10.0, 0.0, true));
        harness.send(PlayerSignal::EndOfMedia);
        assert_eq!(harness.engine.state(), S::Completed);

        // Terminal: nothing else moves it
        harness.send(UserCommand::Play);
        assert_eq!(harness.engine.state(), S::Completed);
    }

    #[test]
    fn test_end_of_media_before_last_chapter_buffers() {
        let mut harness = Harness::playing();
        harness.send(chapter(1, 10.0, 0.0, false));
        harness.tick(9.9);
        harness.send(PlayerSignal::EndOfMedia);
        assert_eq!(harness.engine.state(), S::Buffering);
        // Audio ran out before the prefetch threshold; ask for more now
        assert_eq!(harness.channel.chapter_requests(), vec![1, 2]);
        assert!(harness.engine.snapshot().is_stalled);
    }

    #[test]
    fn test_transport_failure_is_fatal() {
        let mut harness = Harness::playing();
        harness.send(EngineInput::TransportFailed {
            message: "socket closed".to_string(),
        });
        assert_eq!(harness.engine.state(), S::Error);
    }

    #[test]
    fn test_malformed_and_duplicate_chapters_are_dropped() {
        let mut harness = Harness::playing();
        harness.send(ServerMessage::ChapterReady(ChapterReady::default()));
        harness.send(chapter(1, 10.0, 0.0, false));
        harness.send(chapter(1, 10.0, 0.0, false));

        assert_eq!(harness.engine.timeline().len(), 2);
        assert_eq!(harness.engine.state(), S::Playing);
        assert_eq!(harness.reports.reports().len(), 2);
    }

    #[test]
    fn test_user_pause_cancels_recovery() {
        let mut harness = Harness::playing();
        harness.send(chapter(1, 100.0, 5.0, false));
        harness.tick(99.8);
        harness.send(PlayerSignal::Stalled);
        harness.send(chapter(2, 50.0, 1.0, false));
        assert!(harness.engine.next_deadline().is_some());

        harness.send(UserCommand::Pause);
        assert_eq!(harness.engine.state(), S::Paused);
        assert!(harness.engine.next_deadline().is_none());
    }

    #[test]
    fn test_new_session_clears_state() {
        let mut harness = Harness::playing();
        harness.send(chapter(1, 10.0, 0.0, false));
        harness.tick(1.0);

        harness.engine.start_session(2, "other");
        let snapshot = harness.engine.snapshot();
        assert_eq!(snapshot.epoch, 2);
        assert_eq!(snapshot.word_count, 0);
        assert_eq!(snapshot.current_word_index, None);
        assert_eq!(snapshot.lifecycle, S::FetchingLinks);
        assert_eq!(
            snapshot.requested_chapter_numbers.into_iter().collect::<Vec<_>>(),
            vec![1]
        );
    }

    #[test]
    fn test_input_without_session_is_dropped() {
        let mut harness = Harness::new();
        harness.send(chapter(1, 10.0, 0.0, false));
        harness.send(UserCommand::Play);
        assert_eq!(harness.engine.state(), S::Idle);
        assert!(harness.events.events().is_empty());
    }
}
