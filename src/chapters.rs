//! Chapter pipeline controller.
//!
//! Tracks which chapters have been requested and received, converts
//! chapter-relative word times onto the global timeline, and decides when the
//! next chapter has to be requested so it arrives before playback needs it.

use crate::defaults;
use crate::error::{EngineError, Result};
use crate::model::{Chapter, RelativeWord};
use crate::timeline::WordTimeline;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

/// A validated chapter ready to be merged into the session.
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterPayload {
    pub number: u32,
    pub title: Option<String>,
    /// Audio duration in seconds.
    pub duration: f64,
    /// Server-side generation time in seconds.
    pub generation_latency: Option<f64>,
    pub is_last: bool,
    /// Words with chapter-relative timing.
    pub words: Vec<RelativeWord>,
}

/// Tuning for the prefetch decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    /// Minimum lead (seconds) between the request and the chapter's end.
    pub prefetch_floor: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            prefetch_floor: defaults::PREFETCH_FLOOR_SECS,
        }
    }
}

/// Result of merging a chapter.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedChapter {
    pub number: u32,
    /// Global offset where the chapter starts.
    pub start_offset: f64,
    /// Timeline indices of the chapter's words.
    pub words: Range<usize>,
    pub is_last: bool,
    pub next_prefetch_threshold: Option<f64>,
}

/// Request/receive bookkeeping for one session.
#[derive(Debug, Clone)]
pub struct ChapterPipeline {
    config: PipelineConfig,
    chapters: BTreeMap<u32, Chapter>,
    requested: BTreeSet<u32>,
    current_chapter_number: u32,
    durations_so_far: f64,
    next_prefetch_threshold: Option<f64>,
    last_chapter_reached: bool,
}

impl ChapterPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            chapters: BTreeMap::new(),
            requested: BTreeSet::new(),
            current_chapter_number: 0,
            durations_so_far: 0.0,
            next_prefetch_threshold: None,
            last_chapter_reached: false,
        }
    }

    /// Forget everything about the current session.
    pub fn reset(&mut self) {
        *self = Self::new(self.config);
    }

    /// Merge a received chapter into the session and the timeline.
    ///
    /// Words are shifted by the durations accumulated *before* this chapter,
    /// then this chapter's duration is added. Duplicates and out-of-order
    /// chapters leave all state untouched.
    pub fn on_chapter_received(
        &mut self,
        payload: ChapterPayload,
        timeline: &mut WordTimeline,
    ) -> Result<AcceptedChapter> {
        let number = payload.number;
        if self.chapters.contains_key(&number) {
            return Err(EngineError::DuplicateChapter { number });
        }

        let expected = self.current_chapter_number + 1;
        if number != expected {
            return Err(EngineError::OutOfOrderChapter { number, expected });
        }

        let before = self.durations_so_far;
        let words = timeline.append_chapter(number, before, payload.words)?;

        self.durations_so_far = before + payload.duration;
        self.current_chapter_number = number;
        // Arrival also counts as requested, so a chapter pushed unprompted is never re-requested.
        self.requested.insert(number);
        if payload.is_last {
            self.last_chapter_reached = true;
            self.next_prefetch_threshold = None;
        } else {
            self.next_prefetch_threshold =
                Some(before + self.lead(payload.duration, payload.generation_latency));
        }

        self.chapters.insert(
            number,
            Chapter {
                number,
                title: payload.title,
                duration: Some(payload.duration),
                start_offset: before,
                is_complete: payload.is_last,
                generation_latency: payload.generation_latency,
            },
        );

        Ok(AcceptedChapter {
            number,
            start_offset: before,
            words,
            is_last: payload.is_last,
            next_prefetch_threshold: self.next_prefetch_threshold,
        })
    }

    /// Global time at which the chapter after `chapter` should be requested.
    ///
    /// `None` for the last chapter or one without a known duration.
    pub fn threshold_for(&self, chapter: &Chapter) -> Option<f64> {
        if chapter.is_complete {
            return None;
        }
        let duration = chapter.duration?;
        Some(chapter.start_offset + self.lead(duration, chapter.generation_latency))
    }

    fn lead(&self, duration: f64, generation_latency: Option<f64>) -> f64 {
        let latency = generation_latency.unwrap_or(0.0);
        (duration - 2.0 * latency).max(self.config.prefetch_floor)
    }

    /// Chapter number to request now, if one is due.
    ///
    /// Returns `Some` at most once per chapter number: the number is recorded
    /// as requested before it is handed out.
    pub fn request_next_chapter_if_due(&mut self, current_global_time: f64) -> Option<u32> {
        if self.last_chapter_reached {
            return None;
        }
        let threshold = self.next_prefetch_threshold?;
        if current_global_time < threshold {
            return None;
        }
        let next = self.current_chapter_number + 1;
        if !self.requested.insert(next) {
            return None;
        }
        Some(next)
    }

    /// Record an explicit request (the first chapter at session start).
    ///
    /// Returns false if the chapter was already requested.
    pub fn mark_requested(&mut self, number: u32) -> bool {
        self.requested.insert(number)
    }

    /// Server says no further chapters will follow.
    pub fn mark_complete(&mut self) {
        self.last_chapter_reached = true;
        self.next_prefetch_threshold = None;
    }

    /// Requested chapters that have not arrived yet.
    pub fn outstanding(&self) -> impl Iterator<Item = u32> + '_ {
        self.requested
            .iter()
            .copied()
            .filter(|n| !self.chapters.contains_key(n))
    }

    pub fn chapter(&self, number: u32) -> Option<&Chapter> {
        self.chapters.get(&number)
    }

    pub fn chapters(&self) -> impl Iterator<Item = &Chapter> {
        self.chapters.values()
    }

    pub fn chapter_count(&self) -> usize {
        self.chapters.len()
    }

    /// Chapter covering global time `t`.
    pub fn chapter_at(&self, t: f64) -> Option<&Chapter> {
        self.chapters.values().find(|c| c.covers(t))
    }

    pub fn requested(&self) -> &BTreeSet<u32> {
        &self.requested
    }

    pub fn current_chapter_number(&self) -> u32 {
        self.current_chapter_number
    }

    pub fn durations_so_far(&self) -> f64 {
        self.durations_so_far
    }

    /// Total audio received so far; equal to `durations_so_far`.
    pub fn total_duration(&self) -> f64 {
        self.durations_so_far
    }

    pub fn next_prefetch_threshold(&self) -> Option<f64> {
        self.next_prefetch_threshold
    }

    pub fn last_chapter_reached(&self) -> bool {
        self.last_chapter_reached
    }
}

impl Default for ChapterPipeline {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(number: u32, duration: f64, latency: Option<f64>, is_last: bool) -> ChapterPayload {
        ChapterPayload {
            number,
            title: None,
            duration,
            generation_latency: latency,
            is_last,
            words: vec![
                RelativeWord::new("first", 0.0, 1.0),
                RelativeWord::new("second", 1.0, 2.0),
            ],
        }
    }

    #[test]
    fn test_threshold_uses_double_latency() {
        let mut pipeline = ChapterPipeline::default();
        let mut timeline = WordTimeline::new();

        let accepted = pipeline
            .on_chapter_received(payload(1, 100.0, Some(5.0), false), &mut timeline)
            .unwrap();

        assert_eq!(accepted.start_offset, 0.0);
        assert_eq!(accepted.next_prefetch_threshold, Some(90.0));
        assert_eq!(pipeline.durations_so_far(), 100.0);
    }

    #[test]
    fn test_threshold_respects_floor() {
        let mut pipeline = ChapterPipeline::default();
        let mut timeline = WordTimeline::new();
        pipeline
            .on_chapter_received(payload(1, 100.0, Some(5.0), false), &mut timeline)
            .unwrap();

        // 8 − 2×6 < 5 → floor applies, measured from the chapter's own start
        pipeline
            .on_chapter_received(payload(2, 8.0, Some(6.0), false), &mut timeline)
            .unwrap();
        assert_eq!(pipeline.next_prefetch_threshold(), Some(105.0));
    }

    #[test]
    fn test_words_shifted_by_previous_durations() {
        let mut pipeline = ChapterPipeline::default();
        let mut timeline = WordTimeline::new();
        pipeline
            .on_chapter_received(payload(1, 30.0, None, false), &mut timeline)
            .unwrap();
        let accepted = pipeline
            .on_chapter_received(payload(2, 20.0, None, false), &mut timeline)
            .unwrap();

        assert_eq!(accepted.words, 2..4);
        assert_eq!(timeline.get(2).unwrap().start, 30.0);
        assert_eq!(timeline.get(3).unwrap().end, 32.0);
        assert_eq!(pipeline.chapter(2).unwrap().start_offset, 30.0);
    }

    #[test]
    fn test_request_fires_exactly_at_threshold_once() {
        let mut pipeline = ChapterPipeline::default();
        let mut timeline = WordTimeline::new();
        pipeline
            .on_chapter_received(payload(1, 100.0, Some(5.0), false), &mut timeline)
            .unwrap();

        assert_eq!(pipeline.request_next_chapter_if_due(89.9), None);
        assert_eq!(pipeline.request_next_chapter_if_due(90.0), Some(2));
        for t in [90.0, 90.5, 95.0, 99.9] {
            assert_eq!(pipeline.request_next_chapter_if_due(t), None);
        }
        assert!(pipeline.requested().contains(&2));
        assert_eq!(pipeline.outstanding().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_no_request_before_first_chapter() {
        let mut pipeline = ChapterPipeline::default();
        assert_eq!(pipeline.request_next_chapter_if_due(1_000.0), None);
    }

    #[test]
    fn test_duplicate_is_rejected_without_side_effects() {
        let mut pipeline = ChapterPipeline::default();
        let mut timeline = WordTimeline::new();
        pipeline
            .on_chapter_received(payload(1, 10.0, None, false), &mut timeline)
            .unwrap();

        let err = pipeline
            .on_chapter_received(payload(1, 10.0, None, false), &mut timeline)
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateChapter { number: 1 }));
        assert_eq!(pipeline.durations_so_far(), 10.0);
        assert_eq!(timeline.len(), 2);
    }

    #[test]
    fn test_gap_is_out_of_order() {
        let mut pipeline = ChapterPipeline::default();
        let mut timeline = WordTimeline::new();
        pipeline
            .on_chapter_received(payload(1, 10.0, None, false), &mut timeline)
            .unwrap();

        let err = pipeline
            .on_chapter_received(payload(3, 10.0, None, false), &mut timeline)
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::OutOfOrderChapter {
                number: 3,
                expected: 2
            }
        ));
        assert!(err.is_defect());
        assert_eq!(pipeline.current_chapter_number(), 1);

        // The real next chapter still goes through
        assert!(
            pipeline
                .on_chapter_received(payload(2, 10.0, None, false), &mut timeline)
                .is_ok()
        );
    }

    #[test]
    fn test_negative_relative_word_time_is_a_timeline_defect() {
        let mut pipeline = ChapterPipeline::default();
        let mut timeline = WordTimeline::new();
        pipeline
            .on_chapter_received(payload(1, 10.0, None, false), &mut timeline)
            .unwrap();

        let mut bad = payload(2, 10.0, None, false);
        bad.words = vec![RelativeWord::new("rewind", -9.5, -9.0)];
        let err = pipeline
            .on_chapter_received(bad, &mut timeline)
            .unwrap_err();
        assert!(matches!(err, EngineError::TimelineOrder { number: 2, .. }));
        assert_eq!(pipeline.durations_so_far(), 10.0);
        assert!(pipeline.chapter(2).is_none());
    }

    #[test]
    fn test_last_chapter_stops_requests() {
        let mut pipeline = ChapterPipeline::default();
        let mut timeline = WordTimeline::new();
        pipeline
            .on_chapter_received(payload(1, 10.0, None, false), &mut timeline)
            .unwrap();
        pipeline
            .on_chapter_received(payload(2, 10.0, None, true), &mut timeline)
            .unwrap();

        assert!(pipeline.last_chapter_reached());
        assert_eq!(pipeline.next_prefetch_threshold(), None);
        assert_eq!(pipeline.request_next_chapter_if_due(1_000.0), None);
        assert!(pipeline.chapter(2).unwrap().is_complete);
    }

    #[test]
    fn test_threshold_for_stored_chapters() {
        let mut pipeline = ChapterPipeline::default();
        let mut timeline = WordTimeline::new();
        pipeline
            .on_chapter_received(payload(1, 100.0, Some(5.0), false), &mut timeline)
            .unwrap();
        pipeline
            .on_chapter_received(payload(2, 8.0, Some(6.0), true), &mut timeline)
            .unwrap();

        let first = pipeline.chapter(1).unwrap();
        assert_eq!(pipeline.threshold_for(first), Some(90.0));
        let last = pipeline.chapter(2).unwrap();
        assert_eq!(pipeline.threshold_for(last), None);
    }

    #[test]
    fn test_mark_complete_stops_requests() {
        let mut pipeline = ChapterPipeline::default();
        let mut timeline = WordTimeline::new();
        pipeline
            .on_chapter_received(payload(1, 10.0, None, false), &mut timeline)
            .unwrap();
        pipeline.mark_complete();
        assert_eq!(pipeline.request_next_chapter_if_due(9.0), None);
    }

    #[test]
    fn test_chapter_at() {
        let mut pipeline = ChapterPipeline::default();
        let mut timeline = WordTimeline::new();
        pipeline
            .on_chapter_received(payload(1, 10.0, None, false), &mut timeline)
            .unwrap();
        pipeline
            .on_chapter_received(payload(2, 5.0, None, false), &mut timeline)
            .unwrap();

        assert_eq!(pipeline.chapter_at(3.0).map(|c| c.number), Some(1));
        assert_eq!(pipeline.chapter_at(10.0).map(|c| c.number), Some(2));
        assert_eq!(pipeline.chapter_at(15.0), None);
        assert_eq!(pipeline.chapter_count(), 2);
    }

    #[test]
    fn test_reset_keeps_config() {
        let mut pipeline = ChapterPipeline::new(PipelineConfig {
            prefetch_floor: 20.0,
        });
        let mut timeline = WordTimeline::new();
        pipeline
            .on_chapter_received(payload(1, 30.0, Some(10.0), false), &mut timeline)
            .unwrap();
        assert_eq!(pipeline.next_prefetch_threshold(), Some(20.0));

        pipeline.reset();
        assert_eq!(pipeline.current_chapter_number(), 0);
        assert_eq!(pipeline.durations_so_far(), 0.0);
        assert!(pipeline.requested().is_empty());

        pipeline
            .on_chapter_received(payload(1, 30.0, Some(10.0), false), &mut WordTimeline::new())
            .unwrap();
        assert_eq!(pipeline.next_prefetch_threshold(), Some(20.0));
    }
}
