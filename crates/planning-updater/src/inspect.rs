use chrono::{DateTime, Utc};
use std::fmt;
use std::path::Path;

use crate::download::CalendarDownloader;
use crate::error::{UpdaterError, UpdaterResult};
use crate::extractor::{parse_calendar, SourceEvent};

/// Event count and start range of one calendar
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarSummary {
    pub source: String,
    pub count: usize,
    pub first_start: Option<DateTime<Utc>>,
    pub last_start: Option<DateTime<Utc>>,
}

impl CalendarSummary {
    pub fn from_events(source: impl Into<String>, events: &[SourceEvent]) -> Self {
        let starts: Vec<_> = events
            .iter()
            .filter_map(|e| e.start.as_ref())
            .map(|s| s.to_utc())
            .collect();

        Self {
            source: source.into(),
            count: events.len(),
            first_start: starts.iter().min().copied(),
            last_start: starts.iter().max().copied(),
        }
    }
}

impl fmt::Display for CalendarSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Calendar {}", self.source)?;
        writeln!(f, "Events count {}", self.count)?;
        match (self.first_start, self.last_start) {
            (Some(first), Some(last)) => {
                writeln!(f, "Events from {}", first)?;
                write!(f, "Events to {}", last)
            }
            _ => write!(f, "No dated events"),
        }
    }
}

/// Summarize a calendar read from a local file or an `http(s)` address.
pub async fn inspect(source: &str) -> UpdaterResult<CalendarSummary> {
    let events = if source.starts_with("http://") || source.starts_with("https://") {
        CalendarDownloader::new()?.fetch_calendar(source).await?
    } else {
        let text = tokio::fs::read_to_string(Path::new(source))
            .await
            .map_err(|e| UpdaterError::Unexpected(anyhow::anyhow!("cannot read {}: {}", source, e)))?;
        parse_calendar(&text)?
    };

    Ok(CalendarSummary::from_events(source, &events))
}
