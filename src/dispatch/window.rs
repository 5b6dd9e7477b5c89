use chrono::{NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

/// Time-of-day interval `[start, end)` in which the response must be delivered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Default for ResponseWindow {
    fn default() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(16, 0, 0).unwrap_or(NaiveTime::MIN),
            end: NaiveTime::from_hms_opt(17, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

impl ResponseWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Compares at whole-second resolution, like the `HH:MM:SS` labels of the series.
    pub fn contains(&self, t: &NaiveDateTime) -> bool {
        let tod = t.time().with_nanosecond(0).unwrap_or(t.time());
        tod >= self.start && tod < self.end
    }

    /// Positions of every sample inside the window, across all days of the axis.
    pub fn indices(&self, timestamps: &[NaiveDateTime]) -> Vec<usize> {
        timestamps
            .iter()
            .enumerate()
            .filter(|(_, t)| self.contains(t))
            .map(|(i, _)| i)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn window_is_half_open() {
        let day = NaiveDate::from_ymd_opt(2025, 8, 4).unwrap();
        let start = day.and_hms_opt(15, 30, 0).unwrap();
        let axis: Vec<_> = (0..8)
            .map(|i| start + chrono::Duration::minutes(15 * i))
            .collect();
        // 15:30 15:45 16:00 16:15 16:30 16:45 17:00 17:15
        assert_eq!(ResponseWindow::default().indices(&axis), vec![2, 3, 4, 5]);
    }

    #[test]
    fn deserializes_clock_strings() {
        let w: ResponseWindow =
            serde_json::from_str(r#"{"start":"09:00:00","end":"10:30:00"}"#).unwrap();
        assert_eq!(w.end, NaiveTime::from_hms_opt(10, 30, 0).unwrap());
    }
}
