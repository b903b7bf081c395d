//! Turns raw calendar entries into [`Event`] records.
//!
//! All timestamps are normalized to UTC: zoned values are converted through
//! their TZID, floating values are read as UTC wall-clock time and date-only
//! values resolve to midnight UTC.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use icalendar::{Calendar, CalendarComponent, Component};
use planning_types::Event;

use crate::classifier::Classifier;
use crate::config::{ConfigError, ParserParams};
use crate::error::{UpdaterError, UpdaterResult};

/// DTSTART / DTEND value as written in the feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceTime {
    Date(NaiveDate),
    Floating(NaiveDateTime),
    Utc(DateTime<Utc>),
    Zoned {
        date_time: NaiveDateTime,
        tzid: String,
    },
}

impl SourceTime {
    /// Parse a DATE or DATE-TIME value with its optional TZID / VALUE parameters.
    pub fn parse(value: &str, tzid: Option<&str>, value_type: Option<&str>) -> Option<Self> {
        let value = value.trim();

        if value_type.is_some_and(|v| v.eq_ignore_ascii_case("DATE")) || value.len() == 8 {
            return NaiveDate::parse_from_str(value, "%Y%m%d")
                .ok()
                .map(SourceTime::Date);
        }

        if let Some(utc) = value.strip_suffix('Z') {
            return NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S")
                .ok()
                .map(|dt| SourceTime::Utc(dt.and_utc()));
        }

        let date_time = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S").ok()?;
        Some(match tzid {
            Some(tzid) => SourceTime::Zoned {
                date_time,
                tzid: tzid.trim_matches('"').trim_start_matches('/').to_string(),
            },
            None => SourceTime::Floating(date_time),
        })
    }

    pub fn to_utc(&self) -> DateTime<Utc> {
        match self {
            SourceTime::Date(date) => date.and_time(chrono::NaiveTime::MIN).and_utc(),
            SourceTime::Floating(date_time) => date_time.and_utc(),
            SourceTime::Utc(date_time) => *date_time,
            SourceTime::Zoned { date_time, tzid } => match tzid.parse::<chrono_tz::Tz>() {
                Ok(tz) => match tz.from_local_datetime(date_time).earliest() {
                    Some(dt) => dt.with_timezone(&Utc),
                    None => {
                        // skipped by a forward DST transition
                        tracing::warn!(
                            "{} does not exist in {}, shifting it one hour forward",
                            date_time,
                            tzid
                        );
                        tz.from_local_datetime(&(*date_time + Duration::hours(1)))
                            .earliest()
                            .map(|dt| dt.with_timezone(&Utc))
                            .unwrap_or_else(|| date_time.and_utc())
                    }
                },
                Err(_) => {
                    tracing::warn!("Unknown TZID {}, reading {} as UTC", tzid, date_time);
                    date_time.and_utc()
                }
            },
        }
    }
}

/// The properties of one VEVENT the updater cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceEvent {
    pub uid: Option<String>,
    pub summary: Option<String>,
    pub start: Option<SourceTime>,
    pub end: Option<SourceTime>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub class: Option<String>,
}

impl SourceEvent {
    fn from_component(event: &icalendar::Event) -> Self {
        Self {
            uid: property_text(event, "UID"),
            summary: property_text(event, "SUMMARY"),
            start: property_time(event, "DTSTART"),
            end: property_time(event, "DTEND"),
            location: property_text(event, "LOCATION"),
            description: property_text(event, "DESCRIPTION"),
            class: property_text(event, "CLASS"),
        }
    }
}

fn property_text(event: &icalendar::Event, key: &str) -> Option<String> {
    event
        .properties()
        .get(key)
        .map(|prop| prop.value().to_string())
}

fn property_time(event: &icalendar::Event, key: &str) -> Option<SourceTime> {
    let prop = event.properties().get(key)?;
    let tzid = prop.params().get("TZID").map(|p| p.value());
    let value_type = prop.params().get("VALUE").map(|p| p.value());
    SourceTime::parse(prop.value(), tzid, value_type)
}

/// Parse an iCalendar document and return its VEVENTs in document order.
pub fn parse_calendar(text: &str) -> UpdaterResult<Vec<SourceEvent>> {
    let trimmed = text.trim_start_matches('\u{feff}').trim_start();
    if !trimmed.starts_with("BEGIN:VCALENDAR") {
        return Err(UpdaterError::MalformedCalendar(
            "document does not start with BEGIN:VCALENDAR".to_string(),
        ));
    }

    let calendar: Calendar = trimmed
        .parse()
        .map_err(|e| UpdaterError::MalformedCalendar(format!("{}", e)))?;

    Ok(calendar
        .components
        .iter()
        .filter_map(|component| match component {
            CalendarComponent::Event(event) => Some(SourceEvent::from_component(event)),
            _ => None,
        })
        .collect())
}

/// Builds events for one branch.
#[derive(Debug, Clone)]
pub struct EventExtractor {
    classifier: Classifier,
    delimiter: String,
}

impl EventExtractor {
    pub fn new(classifier: Classifier, delimiter: impl Into<String>) -> Self {
        Self {
            classifier,
            delimiter: delimiter.into(),
        }
    }

    pub fn from_params(params: &ParserParams) -> Result<Self, ConfigError> {
        Ok(Self::new(Classifier::from_params(params)?, params.delimiter()))
    }

    pub fn extract(&self, source: &SourceEvent, update_time: DateTime<Utc>) -> UpdaterResult<Event> {
        let event_id = source
            .uid
            .clone()
            .filter(|uid| !uid.is_empty())
            .ok_or_else(|| UpdaterError::extraction("<none>", "missing UID"))?;
        let start_date = source
            .start
            .as_ref()
            .ok_or_else(|| UpdaterError::extraction(&event_id, "missing or invalid DTSTART"))?
            .to_utc();
        let end_date = source
            .end
            .as_ref()
            .ok_or_else(|| UpdaterError::extraction(&event_id, "missing or invalid DTEND"))?
            .to_utc();

        let classrooms = source
            .location
            .as_deref()
            .unwrap_or_default()
            .split(self.delimiter.as_str())
            .filter(|room| !room.is_empty())
            .map(str::to_string)
            .collect();

        let mut fields = self
            .classifier
            .classify(source.description.as_deref().unwrap_or_default(), &self.delimiter);
        if let Classifier::TeacherList = self.classifier {
            if let Some(class) = source.class.as_deref().filter(|c| !c.is_empty()) {
                fields.groups.push(class.to_string());
            }
        }

        Ok(Event {
            title: source.summary.clone().unwrap_or_default(),
            start_date,
            end_date,
            classrooms,
            teachers: fields.teachers,
            groups: fields.groups,
            undetermined_description_items: fields.undetermined,
            event_id,
            last_update: update_time,
            affiliation: Vec::new(),
            old: Vec::new(),
        })
    }

    pub fn extract_all(
        &self,
        sources: &[SourceEvent],
        update_time: DateTime<Utc>,
    ) -> UpdaterResult<Vec<Event>> {
        sources
            .iter()
            .map(|source| self.extract(source, update_time))
            .collect()
    }
}
