//! Time display for the chat views.
//!
//! Every timestamp is shifted into one fixed display timezone before it is
//! compared or formatted, so "today" means the same thing for every viewer.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Timelike, Utc, Weekday};
use serde::Serialize;

use crate::models::Message;

/// A row of the rendered message list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "row", rename_all = "snake_case")]
pub enum DisplayRow<'a> {
    DaySeparator { label: String },
    Message { message: &'a Message, time: String },
}

#[derive(Debug, Clone, Copy)]
pub struct DisplayClock {
    offset: FixedOffset,
}

impl DisplayClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn to_display(&self, ts: DateTime<Utc>) -> DateTime<FixedOffset> {
        ts.with_timezone(&self.offset)
    }

    pub fn display_day(&self, ts: DateTime<Utc>) -> NaiveDate {
        self.to_display(ts).date_naive()
    }

    /// "HH:MM" in the display timezone.
    pub fn time_of_day(&self, ts: DateTime<Utc>) -> String {
        let local = self.to_display(ts);
        format!("{:02}:{:02}", local.hour(), local.minute())
    }

    /// Separator label for the display-day containing `ts`, relative to `now`.
    pub fn day_label(&self, ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
        let day = self.display_day(ts);
        let today = self.display_day(now);
        let age_days = (today - day).num_days();
        match age_days {
            0 => "Today".to_string(),
            1 => "Yesterday".to_string(),
            2..=6 => weekday_name(day.weekday()).to_string(),
            _ => short_date(day),
        }
    }

    /// Compact age for list rows.
    pub fn relative_age(&self, ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
        let secs = (now - ts).num_seconds();
        if secs < 60 {
            return "just now".to_string();
        }
        if secs < 3_600 {
            return format!("{} min", secs / 60);
        }
        if secs < 86_400 {
            return format!("{} h", secs / 3_600);
        }
        if secs < 7 * 86_400 {
            return format!("{} d", secs / 86_400);
        }
        short_date(self.display_day(ts))
    }

    /// Interleaves day separators with messages. A label is emitted before the
    /// first message of each distinct display-day and never repeated for
    /// consecutive messages of the same day.
    pub fn group_by_day<'a>(&self, messages: &'a [Message], now: DateTime<Utc>) -> Vec<DisplayRow<'a>> {
        let mut rows = Vec::with_capacity(messages.len() + 4);
        let mut current_day: Option<NaiveDate> = None;
        for message in messages {
            let day = self.display_day(message.created_at);
            if current_day != Some(day) {
                rows.push(DisplayRow::DaySeparator { label: self.day_label(message.created_at, now) });
                current_day = Some(day);
            }
            rows.push(DisplayRow::Message { message, time: self.time_of_day(message.created_at) });
        }
        rows
    }
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

fn short_date(day: NaiveDate) -> String {
    format!("{:02}/{:02}/{}", day.day(), day.month(), day.year())
}

/// Human-readable byte size for attachment cards.
pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let b = bytes as f64;
    if b < KB {
        format!("{bytes} B")
    } else if b < KB * KB {
        format!("{:.1} KB", b / KB)
    } else if b < KB * KB * KB {
        format!("{:.1} MB", b / (KB * KB))
    } else {
        format!("{:.1} GB", b / (KB * KB * KB))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::models::{DeliveryStatus, MessageId, MessageType, SenderRole};

    fn clock() -> DisplayClock {
        DisplayClock::new(FixedOffset::east_opt(3600).unwrap())
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn message(ts: DateTime<Utc>) -> Message {
        Message {
            id: MessageId::Confirmed(ts.timestamp().to_string()),
            conversation_id: "c".into(),
            sender: SenderRole::Visitor,
            kind: MessageType::Text,
            content: Some("hi".into()),
            attachment: None,
            created_at: ts,
            status: DeliveryStatus::Sent,
            upload_progress: None,
        }
    }

    #[test]
    fn labels_follow_priority_order() {
        let c = clock();
        // Wednesday 2024-01-10, 12:00 display time.
        let now = at(2024, 1, 10, 11, 0);
        assert_eq!(c.day_label(at(2024, 1, 10, 8, 0), now), "Today");
        assert_eq!(c.day_label(at(2024, 1, 9, 20, 0), now), "Yesterday");
        assert_eq!(c.day_label(at(2024, 1, 5, 10, 0), now), "Friday");
        assert_eq!(c.day_label(at(2024, 1, 3, 10, 0), now), "03/01/2024");
    }

    #[test]
    fn offset_is_applied_before_comparing_days() {
        let c = clock();
        let now = at(2024, 1, 10, 11, 0);
        // 23:30 UTC on the 9th is already the 10th at UTC+1.
        assert_eq!(c.day_label(at(2024, 1, 9, 23, 30), now), "Today");
        assert_eq!(c.time_of_day(at(2024, 1, 9, 23, 30)), "00:30");
    }

    #[test]
    fn day_label_is_stable_within_the_same_day() {
        let c = clock();
        let ts = at(2024, 1, 8, 9, 0);
        let morning = at(2024, 1, 10, 0, 5);
        let evening = at(2024, 1, 10, 22, 50);
        let first = c.day_label(ts, morning);
        assert_eq!(first, c.day_label(ts, morning));
        assert_eq!(first, c.day_label(ts, evening));
    }

    #[test]
    fn grouping_emits_one_separator_per_day() {
        let c = clock();
        let now = at(2024, 1, 10, 11, 0);
        let messages = vec![
            message(at(2024, 1, 9, 9, 0)),
            message(at(2024, 1, 9, 10, 0)),
            message(at(2024, 1, 10, 9, 0)),
        ];
        let rows = c.group_by_day(&messages, now);
        let labels: Vec<_> = rows
            .iter()
            .filter_map(|r| match r {
                DisplayRow::DaySeparator { label } => Some(label.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(labels, vec!["Yesterday", "Today"]);
        assert_eq!(rows.len(), 5);
    }

    #[test]
    fn relative_age_and_sizes() {
        let c = clock();
        let now = at(2024, 1, 10, 11, 0);
        assert_eq!(c.relative_age(at(2024, 1, 10, 10, 59), now), "1 min");
        assert_eq!(c.relative_age(at(2024, 1, 10, 8, 0), now), "3 h");
        assert_eq!(c.relative_age(now, now), "just now");
        assert_eq!(format_size(4 * 1024 * 1024), "4.0 MB");
        assert_eq!(format_size(512), "512 B");
    }
}
