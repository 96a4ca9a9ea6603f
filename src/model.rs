//! Core data types shared by the engine components.

use serde::Serialize;

/// A chapter accepted into the session.
///
/// `duration` and `start_offset` never change once the chapter is stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chapter {
    /// Sequential chapter number, starting at 1.
    pub number: u32,
    /// Optional display title.
    pub title: Option<String>,
    /// Audio duration in seconds.
    pub duration: Option<f64>,
    /// Global-timeline position (seconds) where this chapter begins.
    pub start_offset: f64,
    /// Whether the server marked this as the final chapter.
    pub is_complete: bool,
    /// Time the server spent generating this chapter, in seconds.
    pub generation_latency: Option<f64>,
}

impl Chapter {
    /// Global time at which this chapter ends.
    pub fn end_offset(&self) -> f64 {
        self.start_offset + self.duration.unwrap_or(0.0)
    }

    /// Whether `t` falls inside `[start_offset, end_offset)`.
    pub fn covers(&self, t: f64) -> bool {
        t >= self.start_offset && t < self.end_offset()
    }
}

/// One transcribed word located on the global timeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WordSpan {
    /// Global start time in seconds.
    pub start: f64,
    /// Global end time in seconds (`end >= start`).
    pub end: f64,
    /// The word as spoken.
    pub text: String,
    /// Position of this span in the global timeline.
    pub original_index: usize,
    /// Chapter the word belongs to.
    pub chapter_number: u32,
}

impl WordSpan {
    /// Zero-duration spans mark a single instant and match by proximity.
    pub fn is_marker(&self) -> bool {
        self.start == self.end
    }

    /// Whether `t` lies in the closed interval `[start, end]`.
    pub fn contains(&self, t: f64) -> bool {
        t >= self.start && t <= self.end
    }
}

/// A word with chapter-relative timing, before it joins the global timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct RelativeWord {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

impl RelativeWord {
    pub fn new(text: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            text: text.into(),
            start,
            end,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chapter(start_offset: f64, duration: Option<f64>) -> Chapter {
        Chapter {
            number: 1,
            title: None,
            duration,
            start_offset,
            is_complete: false,
            generation_latency: None,
        }
    }

    #[test]
    fn test_chapter_end_offset() {
        assert_eq!(chapter(10.0, Some(5.0)).end_offset(), 15.0);
        assert_eq!(chapter(10.0, None).end_offset(), 10.0);
    }

    #[test]
    fn test_chapter_covers_is_half_open() {
        let c = chapter(10.0, Some(5.0));
        assert!(c.covers(10.0));
        assert!(c.covers(14.99));
        assert!(!c.covers(15.0));
        assert!(!c.covers(9.99));
    }

    #[test]
    fn test_word_span_marker_and_contains() {
        let word = WordSpan {
            start: 1.0,
            end: 2.0,
            text: "hello".to_string(),
            original_index: 0,
            chapter_number: 1,
        };
        assert!(!word.is_marker());
        assert!(word.contains(1.0));
        assert!(word.contains(2.0));
        assert!(!word.contains(2.01));

        let marker = WordSpan {
            start: 3.0,
            end: 3.0,
            ..word
        };
        assert!(marker.is_marker());
        assert!(marker.contains(3.0));
    }
}
