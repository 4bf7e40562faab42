use async_graphql::SimpleObject;

use crate::error::{BookingError, BookingResult};
use crate::models::TimeOfDay;

/// A half-open `[start, end)` stretch of a single day.
#[derive(SimpleObject, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimeRange {
    /// When the range opens
    pub start: TimeOfDay,
    /// When the range closes (exclusive)
    pub end: TimeOfDay,
}

impl TimeRange {
    pub fn new(start: TimeOfDay, end: TimeOfDay) -> BookingResult<Self> {
        if start < end {
            Ok(Self { start, end })
        } else {
            Err(BookingError::validation(format!(
                "Start time {} must be before end time {}",
                start, end
            )))
        }
    }

    /// Both ends present and ordered, or both absent.
    pub fn from_optional(
        start: Option<TimeOfDay>,
        end: Option<TimeOfDay>,
    ) -> BookingResult<Option<Self>> {
        match (start, end) {
            (Some(start), Some(end)) => Self::new(start, end).map(Some),
            (None, None) => Ok(None),
            _ => Err(BookingError::validation(
                "Start and end time must be given together",
            )),
        }
    }

    /// Ranges that only touch (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && self.end > other.start
    }

    pub fn contains(&self, other: &TimeRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Overlapping or back-to-back ranges can be merged into one.
    pub fn touches(&self, other: &TimeRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// What is left of this range once `other` is cut out of it.
    pub fn subtract(&self, other: &TimeRange) -> Vec<TimeRange> {
        if !self.overlaps(other) {
            return vec![*self];
        }

        let mut pieces = Vec::with_capacity(2);
        if self.start < other.start {
            pieces.push(TimeRange {
                start: self.start,
                end: other.start,
            });
        }
        if other.end < self.end {
            pieces.push(TimeRange {
                start: other.end,
                end: self.end,
            });
        }

        pieces
    }

    pub fn minutes(&self) -> u32 {
        (self.end.seconds_since_midnight() - self.start.seconds_since_midnight()) / 60
    }
}
