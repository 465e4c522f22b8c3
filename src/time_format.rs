//! Elapsed-time strings for the view clocks ("3 hours and 5 minutes ago").

use chrono::TimeDelta;

/// A formatted span split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElapsedText {
    first: String,
    and: String,
    post: String,
    span: TimeDelta,
}

impl ElapsedText {
    fn new(first: impl Into<String>, and: impl Into<String>, post: &str, span: TimeDelta) -> Self {
        Self {
            first: first.into(),
            and: and.into(),
            post: if post.is_empty() {
                String::new()
            } else {
                format!(" {post}")
            },
            span,
        }
    }

    /// Both units, e.g. "2 hours and 5 minutes ago".
    pub fn full(&self) -> String {
        format!("{}{}{}", self.first, self.and, self.post)
    }

    /// Leading unit only, e.g. "2 hours ago".
    pub fn short(&self) -> String {
        format!("{}{}", self.first, self.post)
    }

    /// The span this text was formatted from.
    pub fn span(&self) -> TimeDelta {
        self.span
    }
}

fn count(n: i64, unit: &str) -> String {
    format!("{n} {unit}{}", if n > 1 { "s" } else { "" })
}

fn and_count(n: i64, unit: &str) -> String {
    if n == 0 {
        String::new()
    } else {
        format!(" and {}", count(n, unit))
    }
}

fn total_secs(span: TimeDelta) -> f64 {
    span.num_milliseconds() as f64 / 1000.0
}

/// Two-unit elapsed time. Spans under a minute print `when_small` without
/// `post`; negative spans are reported as invalid.
pub fn format_elapsed(span: TimeDelta, when_small: &str, post: &str) -> ElapsedText {
    let secs = total_secs(span);
    if secs < 0.0 {
        return ElapsedText::new("Invalid date", " (in the future)", "", span);
    }

    let minutes = secs / 60.0;
    let hours = minutes / 60.0;
    let days = hours / 24.0;

    if minutes < 1.0 {
        ElapsedText::new(when_small, "", "", span)
    } else if minutes < 120.0 {
        ElapsedText::new(count(minutes as i64, "minute"), "", post, span)
    } else if hours < 48.0 {
        let minute_part = (minutes as i64) % 60;
        ElapsedText::new(
            count(hours as i64, "hour"),
            and_count(minute_part, "minute"),
            post,
            span,
        )
    } else if days < 420.0 {
        let weeks = (days / 7.0) as i64;
        let days_and_hours = days % 7.0;
        let whole_days = days_and_hours as i64;
        if weeks > 0 {
            ElapsedText::new(
                count(weeks, "week"),
                and_count(whole_days, "day"),
                post,
                span,
            )
        } else {
            let hour_part = ((days_and_hours - whole_days as f64) * 24.0) as i64;
            ElapsedText::new(
                count(whole_days, "day"),
                and_count(hour_part, "hour"),
                post,
                span,
            )
        }
    } else {
        let years = (days / 365.25) as i64;
        let weeks = ((days % 365.25) / 7.0) as i64;
        ElapsedText::new(count(years, "year"), and_count(weeks, "week"), post, span)
    }
}

/// Single-unit elapsed time, e.g. "5 days".
pub fn format_elapsed_short(span: TimeDelta, when_small: &str) -> String {
    let secs = total_secs(span);
    if secs < 0.0 {
        return "Invalid date (in the future)".to_string();
    }

    let minutes = secs / 60.0;
    let hours = minutes / 60.0;
    let days = hours / 24.0;

    if minutes < 1.0 {
        when_small.to_string()
    } else if minutes < 60.0 {
        count(minutes as i64, "minute")
    } else if hours < 24.0 {
        count(hours as i64, "hour")
    } else if days < 365.0 {
        count(days as i64, "day")
    } else {
        count((days / 365.0) as i64, "year")
    }
}
