//! Property tests for timeline construction and position lookup.

use chapterflow::chapters::{ChapterPayload, ChapterPipeline, PipelineConfig};
use chapterflow::model::RelativeWord;
use chapterflow::sync::{PositionSynchronizer, SyncConfig};
use chapterflow::timeline::WordTimeline;
use quickcheck::{Arbitrary, Gen};

const MARKER_EPSILON: f64 = 0.08;

fn step(g: &mut Gen, max: u8) -> f64 {
    f64::from(u8::arbitrary(g) % max) * 0.05
}

/// Words on one chapter, plus positions to probe.
///
/// Words may overlap the previous one, start together, or have zero
/// duration. Markers may follow each other directly.
#[derive(Debug, Clone)]
struct Layout {
    words: Vec<RelativeWord>,
    positions: Vec<f64>,
}

impl Arbitrary for Layout {
    fn arbitrary(g: &mut Gen) -> Self {
        let count = usize::from(u8::arbitrary(g) % 40) + 1;
        let mut words = Vec::with_capacity(count);
        let mut cursor = step(g, 10);
        let mut previous: Option<(f64, f64)> = None;

        for i in 0..count {
            match u8::arbitrary(g) % 8 {
                // Marker, possibly right after another one
                0 | 1 => {
                    words.push(RelativeWord::new(format!("m{i}"), cursor, cursor));
                    previous = Some((cursor, cursor));
                }
                // Starts before the previous word ends, or together with it
                2 | 3 => {
                    let (prev_start, prev_end) = previous.unwrap_or((cursor, cursor));
                    let start = if bool::arbitrary(g) {
                        prev_start
                    } else {
                        (prev_end - 0.05 - step(g, 4)).max(prev_start)
                    };
                    let end = start + 0.05 + step(g, 30);
                    words.push(RelativeWord::new(format!("o{i}"), start, end));
                    previous = Some((start, end));
                    cursor = cursor.max(end);
                }
                _ => {
                    let end = cursor + 0.1 + step(g, 20);
                    words.push(RelativeWord::new(format!("w{i}"), cursor, end));
                    previous = Some((cursor, end));
                    cursor = end;
                }
            }
            cursor += step(g, 6);
        }

        let total = cursor + 1.0;
        let probes = usize::from(u8::arbitrary(g) % 30) + 1;
        let positions = (0..probes)
            .map(|_| {
                if bool::arbitrary(g) {
                    // Exactly on a boundary
                    let word = &words[usize::arbitrary(g) % words.len()];
                    if bool::arbitrary(g) { word.start } else { word.end }
                } else {
                    f64::from(u16::arbitrary(g)) / f64::from(u16::MAX) * (total + 0.5) - 0.5
                }
            })
            .collect();

        Layout { words, positions }
    }
}

impl Layout {
    fn timeline(&self) -> WordTimeline {
        let mut timeline = WordTimeline::new();
        timeline
            .append_chapter(1, 0.0, self.words.clone())
            .unwrap();
        timeline
    }
}

/// Chapters with unsorted words, possibly with `end < start`.
#[derive(Debug, Clone)]
struct Chapters(Vec<(f64, Vec<RelativeWord>)>);

impl Arbitrary for Chapters {
    fn arbitrary(g: &mut Gen) -> Self {
        let count = usize::from(u8::arbitrary(g) % 6) + 1;
        let chapters = (0..count)
            .map(|_| {
                let duration = step(g, 200);
                let words = (0..u8::arbitrary(g) % 15)
                    .map(|i| {
                        let start = (duration * f64::from(u8::arbitrary(g)) / 255.0).min(duration);
                        let end = (start + step(g, 20) - 0.25).min(duration);
                        RelativeWord::new(format!("c{i}"), start, end)
                    })
                    .collect();
                (duration, words)
            })
            .collect();
        Chapters(chapters)
    }
}

#[quickcheck_macros::quickcheck]
fn prop_resolve_matches_full_scan(layout: Layout) -> bool {
    let timeline = layout.timeline();
    let mut sync = PositionSynchronizer::new(SyncConfig {
        marker_epsilon: MARKER_EPSILON,
        ..SyncConfig::default()
    });

    layout
        .positions
        .iter()
        .all(|&t| sync.resolve(t, &timeline) == timeline.word_at(t, MARKER_EPSILON))
}

#[quickcheck_macros::quickcheck]
fn prop_resolve_matches_full_scan_when_sorted(layout: Layout) -> bool {
    let timeline = layout.timeline();
    let mut sync = PositionSynchronizer::default();
    let mut positions = layout.positions.clone();
    positions.sort_by(f64::total_cmp);

    positions
        .iter()
        .all(|&t| sync.resolve(t, &timeline) == timeline.word_at(t, MARKER_EPSILON))
}

#[quickcheck_macros::quickcheck]
fn prop_timeline_is_monotonic(chapters: Chapters) -> bool {
    let mut pipeline = ChapterPipeline::new(PipelineConfig::default());
    let mut timeline = WordTimeline::new();

    for (i, (duration, words)) in chapters.0.iter().enumerate() {
        let payload = ChapterPayload {
            number: i as u32 + 1,
            title: None,
            duration: *duration,
            generation_latency: None,
            is_last: false,
            words: words.clone(),
        };
        if pipeline.on_chapter_received(payload, &mut timeline).is_err() {
            return false;
        }
    }

    let spans = timeline.spans();
    let ordered = spans.windows(2).all(|pair| pair[0].start <= pair[1].start);
    let well_formed = spans
        .iter()
        .enumerate()
        .all(|(i, span)| span.end >= span.start && span.original_index == i);

    let mut offset = 0.0;
    let mut offsets_match = true;
    for (chapter, (duration, _)) in pipeline.chapters().zip(&chapters.0) {
        offsets_match &= chapter.start_offset == offset;
        offset += duration;
    }

    ordered
        && well_formed
        && offsets_match
        && pipeline.durations_so_far() == offset
        && spans.len() == chapters.0.iter().map(|(_, w)| w.len()).sum::<usize>()
}

#[quickcheck_macros::quickcheck]
fn prop_prefetch_requests_each_chapter_once(chapters: Chapters, probes: Vec<u16>) -> bool {
    let mut pipeline = ChapterPipeline::new(PipelineConfig::default());
    let mut timeline = WordTimeline::new();
    let mut requests = Vec::new();

    for (i, (duration, words)) in chapters.0.iter().enumerate() {
        let payload = ChapterPayload {
            number: i as u32 + 1,
            title: None,
            duration: *duration,
            generation_latency: Some(1.0),
            is_last: false,
            words: words.clone(),
        };
        if pipeline.on_chapter_received(payload, &mut timeline).is_err() {
            return false;
        }
        for probe in &probes {
            let t = f64::from(*probe) / 100.0;
            requests.extend(pipeline.request_next_chapter_if_due(t));
        }
    }

    let mut deduped = requests.clone();
    deduped.dedup();
    deduped == requests && requests.windows(2).all(|pair| pair[0] < pair[1])
}
