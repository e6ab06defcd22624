// src/ingest/planner.rs
//! Splits the overall date window into constant-width segments and lists the
//! pagination offsets probed inside each one.

use chrono::{Duration as ChronoDuration, NaiveDateTime};

use crate::ingest::types::TimeSegment;

/// Upper bound on segments per window.
pub const MAX_SEGMENTS: u32 = 10_000;
/// Upper bound on offset steps per segment.
pub const MAX_OFFSET_STEPS: u32 = 1_000;

/// `count` contiguous segments tiling `[start, end]`.
///
/// - Width is `(end - start) / count`; the last segment ends exactly at `end`.
/// - `count == 0` is treated as 1; `count` is capped at `MAX_SEGMENTS` and at
///   the number of whole seconds in the window.
/// - `end <= start` yields a single segment: reversed bounds are swapped and an
///   empty span is widened to one day.
pub fn plan_segments(start: NaiveDateTime, end: NaiveDateTime, count: u32) -> Vec<TimeSegment> {
    if end <= start {
        let (s, e) = if end < start {
            (end, start)
        } else {
            (start, start + ChronoDuration::days(1))
        };
        tracing::debug!(%start, %end, "degenerate window; planning a single segment");
        return vec![TimeSegment { start: s, end: e }];
    }

    let span_secs = u32::try_from((end - start).num_seconds()).unwrap_or(u32::MAX);
    let count = count.clamp(1, MAX_SEGMENTS).min(span_secs.max(1));
    let width = (end - start) / count as i32;
    let mut out = Vec::with_capacity(count as usize);
    let mut cursor = start;
    for i in 0..count {
        let seg_end = if i + 1 == count { end } else { cursor + width };
        out.push(TimeSegment {
            start: cursor,
            end: seg_end,
        });
        cursor = seg_end;
    }
    out
}

/// Pagination offsets `0, page_size, 2 * page_size, …` (`steps` values).
pub fn offsets(steps: u32, page_size: u32) -> Vec<u32> {
    (0..steps.clamp(1, MAX_OFFSET_STEPS)).map(|i| i.saturating_mul(page_size)).collect()
}

/// The full grid walked by one run, segment-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowPlan {
    pub segments: Vec<TimeSegment>,
    pub offsets: Vec<u32>,
}

impl WindowPlan {
    pub fn new(
        start: NaiveDateTime,
        end: NaiveDateTime,
        segment_count: u32,
        offset_steps: u32,
        page_size: u32,
    ) -> Self {
        Self {
            segments: plan_segments(start, end, segment_count),
            offsets: offsets(offset_steps, page_size),
        }
    }

    pub fn pair_count(&self) -> usize {
        self.segments.len() * self.offsets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn two_segments_over_ten_days_are_five_day_halves() {
        let segs = plan_segments(at(2024, 1, 1), at(2024, 1, 11), 2);
        assert_eq!(
            segs,
            vec![
                TimeSegment {
                    start: at(2024, 1, 1),
                    end: at(2024, 1, 6)
                },
                TimeSegment {
                    start: at(2024, 1, 6),
                    end: at(2024, 1, 11)
                },
            ]
        );
    }

    #[test]
    fn segments_tile_the_window_without_gaps() {
        let start = at(2024, 1, 1);
        let end = at(2024, 3, 17) + ChronoDuration::seconds(13);
        for count in [1, 3, 7, 11, 64] {
            let segs = plan_segments(start, end, count);
            assert_eq!(segs.len(), count as usize);
            assert_eq!(segs.first().unwrap().start, start);
            assert_eq!(segs.last().unwrap().end, end);
            for pair in segs.windows(2) {
                assert_eq!(pair[0].end, pair[1].start);
                assert!(pair[0].start < pair[0].end);
            }
        }
    }

    #[test]
    fn degenerate_windows_yield_one_segment() {
        let t = at(2024, 5, 1);
        assert_eq!(
            plan_segments(t, t, 4),
            vec![TimeSegment {
                start: t,
                end: at(2024, 5, 2)
            }]
        );
        assert_eq!(
            plan_segments(at(2024, 5, 3), t, 4),
            vec![TimeSegment {
                start: t,
                end: at(2024, 5, 3)
            }]
        );
        assert_eq!(plan_segments(t, at(2024, 5, 3), 0).len(), 1);
    }

    #[test]
    fn absurd_counts_are_capped() {
        let start = at(2024, 1, 1);
        let segs = plan_segments(start, at(2025, 1, 1), u32::MAX);
        assert_eq!(segs.len(), MAX_SEGMENTS as usize);
        assert_eq!(segs.last().unwrap().end, at(2025, 1, 1));
        assert!(segs.iter().all(|s| s.start < s.end));

        // Never more segments than seconds in the window.
        let short = plan_segments(start, start + ChronoDuration::seconds(3), 50);
        assert_eq!(short.len(), 3);
        assert!(short.iter().all(|s| s.start < s.end));

        assert_eq!(offsets(u32::MAX, 20).len(), MAX_OFFSET_STEPS as usize);
    }

    #[test]
    fn offsets_step_by_page_size() {
        assert_eq!(offsets(4, 20), vec![0, 20, 40, 60]);
        assert_eq!(offsets(0, 20), vec![0]);
        let plan = WindowPlan::new(at(2024, 1, 1), at(2024, 1, 11), 2, 3, 10);
        assert_eq!(plan.pair_count(), 6);
    }
}
