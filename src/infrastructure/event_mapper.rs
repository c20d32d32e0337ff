use crate::domain::civil_time::{local_instant_utc, local_midnight_utc, parse_timezone};
use crate::domain::models::{Job, ScheduleEvent};
use crate::domain::sync_result::CandidateKind;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;

pub const KEY_SCHEDULE_EVENT_ID: &str = "fs_schedule_event_id";
pub const KEY_JOB_ID: &str = "fs_job_id";
const JOB_ID_LABEL: &str = "job id:";
const UNTITLED_EVENT: &str = "Untitled event";

/// Google's fixed event palette, indexed by `colorId`.
const EVENT_COLORS: [(&str, &str); 11] = [
    ("1", "#7986cb"),
    ("2", "#33b679"),
    ("3", "#8e24aa"),
    ("4", "#e67c73"),
    ("5", "#f6bf26"),
    ("6", "#f4511e"),
    ("7", "#039be5"),
    ("8", "#616161"),
    ("9", "#3f51b5"),
    ("10", "#0b8043"),
    ("11", "#d50000"),
];

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, Default)]
pub struct CalendarEventDateTime {
    #[serde(rename = "dateTime", default, skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(rename = "timeZone", default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

impl CalendarEventDateTime {
    pub fn timed(instant: DateTime<Utc>) -> Self {
        Self {
            date_time: Some(instant.to_rfc3339_opts(SecondsFormat::Secs, true)),
            date: None,
            time_zone: None,
        }
    }

    pub fn all_day(date: NaiveDate) -> Self {
        Self {
            date_time: None,
            date: Some(date.format("%Y-%m-%d").to_string()),
            time_zone: None,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, Default)]
pub struct CalendarEventExtendedProperties {
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub private: HashMap<String, String>,
}

/// An event as the calendar provider represents it on the wire.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, Default)]
pub struct GoogleCalendarEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(rename = "colorId", skip_serializing_if = "Option::is_none")]
    pub color_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
    #[serde(default)]
    pub start: CalendarEventDateTime,
    #[serde(default)]
    pub end: CalendarEventDateTime,
    #[serde(rename = "extendedProperties", skip_serializing_if = "Option::is_none")]
    pub extended_properties: Option<CalendarEventExtendedProperties>,
}

impl GoogleCalendarEvent {
    pub fn remote_id(&self) -> Option<&str> {
        self.id
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn is_cancelled(&self) -> bool {
        self.status
            .as_deref()
            .map(|status| status.trim().eq_ignore_ascii_case("cancelled"))
            .unwrap_or(false)
    }

    fn private_value(&self, key: &str) -> Option<String> {
        self.extended_properties
            .as_ref()
            .and_then(|properties| properties.private.get(key))
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(ToOwned::to_owned)
    }
}

/// Fields every parsed event carries, linked or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFields {
    pub google_calendar_event_id: String,
    pub google_calendar_id: String,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub notes: Option<String>,
    pub location: Option<String>,
    pub color_id: Option<String>,
    pub color: Option<String>,
    pub all_day: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedEvent {
    /// References a local job; `schedule_event_id` is present when we pushed it.
    Linked {
        schedule_event_id: Option<String>,
        job_id: String,
        fields: EventFields,
    },
    Unlinked(EventFields),
}

impl ParsedEvent {
    pub fn fields(&self) -> &EventFields {
        match self {
            Self::Linked { fields, .. } => fields,
            Self::Unlinked(fields) => fields,
        }
    }

    pub fn kind(&self) -> CandidateKind {
        match self {
            Self::Linked { .. } => CandidateKind::Linked,
            Self::Unlinked(_) => CandidateKind::Unlinked,
        }
    }
}

/// Maps one remote event into a local candidate.
///
/// Returns `None` when the event has no id, is cancelled, or has no usable
/// start/end even after the all-day fallback.
pub fn parse_remote_event(
    event: &GoogleCalendarEvent,
    calendar_id: &str,
    timezone: Tz,
) -> Option<ParsedEvent> {
    let remote_id = event.remote_id()?;
    if event.is_cancelled() {
        return None;
    }

    let (start_time, all_day) = resolve_event_time(&event.start, timezone)?;
    let (end_time, _) = resolve_event_time(&event.end, timezone)?;
    if end_time < start_time {
        return None;
    }

    let color_id = event
        .color_id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned);
    let fields = EventFields {
        google_calendar_event_id: remote_id.to_string(),
        google_calendar_id: calendar_id.to_string(),
        title: event
            .summary
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(UNTITLED_EVENT)
            .to_string(),
        start_time,
        end_time,
        notes: non_empty(event.description.as_deref()),
        location: non_empty(event.location.as_deref()),
        color: color_id.as_deref().and_then(color_for_id).map(ToOwned::to_owned),
        color_id,
        all_day,
    };

    let job_id = event
        .private_value(KEY_JOB_ID)
        .or_else(|| event.description.as_deref().and_then(job_id_from_description));
    match job_id {
        Some(job_id) => Some(ParsedEvent::Linked {
            schedule_event_id: event.private_value(KEY_SCHEDULE_EVENT_ID),
            job_id,
            fields,
        }),
        None => Some(ParsedEvent::Unlinked(fields)),
    }
}

/// Builds the provider payload for a local schedule event.
pub fn encode_schedule_event(event: &ScheduleEvent, job: &Job) -> GoogleCalendarEvent {
    let mut private = HashMap::new();
    private.insert(KEY_SCHEDULE_EVENT_ID.to_string(), event.id.clone());
    private.insert(KEY_JOB_ID.to_string(), job.id.clone());

    let job_line = format!("Job ID: {}", job.id);
    let notes = event
        .notes
        .as_deref()
        .map(str::trim)
        .filter(|notes| !notes.is_empty());
    let description = match notes {
        Some(notes) if job_id_from_description(notes).is_some() => notes.to_string(),
        Some(notes) => format!("{notes}\n\n{job_line}"),
        None => job_line,
    };

    GoogleCalendarEvent {
        id: None,
        summary: Some(event.title.clone()),
        description: Some(description),
        location: job.address.clone(),
        status: Some("confirmed".to_string()),
        color_id: event.color.as_deref().and_then(color_id_for).map(ToOwned::to_owned),
        updated: None,
        start: CalendarEventDateTime::timed(event.start_time),
        end: CalendarEventDateTime::timed(event.end_time),
        extended_properties: Some(CalendarEventExtendedProperties { private }),
    }
}

fn resolve_event_time(
    value: &CalendarEventDateTime,
    timezone: Tz,
) -> Option<(DateTime<Utc>, bool)> {
    if let Some(raw) = value.date_time.as_deref().map(str::trim).filter(|raw| !raw.is_empty()) {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Some((parsed.with_timezone(&Utc), false));
        }
        // Floating local time; interpret in the event's zone, else the organisation's.
        let zone = value
            .time_zone
            .as_deref()
            .and_then(|name| parse_timezone(name).ok())
            .unwrap_or(timezone);
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
            return Some((local_instant_utc(naive, zone), false));
        }
    }

    let raw_date = value.date.as_deref().map(str::trim).filter(|raw| !raw.is_empty())?;
    let date = NaiveDate::parse_from_str(raw_date, "%Y-%m-%d").ok()?;
    Some((local_midnight_utc(date, timezone), true))
}

fn job_id_from_description(description: &str) -> Option<String> {
    description.lines().find_map(|line| {
        let line = line.trim();
        if line.len() < JOB_ID_LABEL.len()
            || !line.is_char_boundary(JOB_ID_LABEL.len())
            || !line[..JOB_ID_LABEL.len()].eq_ignore_ascii_case(JOB_ID_LABEL)
        {
            return None;
        }
        let value = line[JOB_ID_LABEL.len()..].trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

pub fn color_for_id(color_id: &str) -> Option<&'static str> {
    EVENT_COLORS
        .iter()
        .find(|(id, _)| *id == color_id)
        .map(|(_, hex)| *hex)
}

pub fn color_id_for(color: &str) -> Option<&'static str> {
    let color = color.trim();
    EVENT_COLORS
        .iter()
        .find(|(_, hex)| hex.eq_ignore_ascii_case(color))
        .map(|(id, _)| *id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::JobStatus;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn timed_event(id: &str, start: &str, end: &str) -> GoogleCalendarEvent {
        GoogleCalendarEvent {
            id: Some(id.to_string()),
            summary: Some("Final inspection".to_string()),
            status: Some("confirmed".to_string()),
            start: CalendarEventDateTime {
                date_time: Some(start.to_string()),
                ..CalendarEventDateTime::default()
            },
            end: CalendarEventDateTime {
                date_time: Some(end.to_string()),
                ..CalendarEventDateTime::default()
            },
            ..GoogleCalendarEvent::default()
        }
    }

    fn sample_job() -> Job {
        Job {
            id: "J1".to_string(),
            name: "Lot 14 final".to_string(),
            address: Some("14 Elm St".to_string()),
            status: JobStatus::Scheduled,
            scheduled_date: Some(fixed_time("2024-05-01T09:00:00Z")),
            original_scheduled_date: None,
            source_google_event_id: None,
            is_cancelled: false,
        }
    }

    #[test]
    fn parses_event_without_linkage_as_unlinked() {
        let event = timed_event("evt-1", "2024-05-01T09:00:00-05:00", "2024-05-01T10:00:00-05:00");
        let parsed = parse_remote_event(&event, "primary", Tz::UTC).expect("usable event");

        let ParsedEvent::Unlinked(fields) = parsed else {
            panic!("expected unlinked candidate");
        };
        assert_eq!(fields.google_calendar_event_id, "evt-1");
        assert_eq!(fields.google_calendar_id, "primary");
        assert_eq!(fields.start_time, fixed_time("2024-05-01T14:00:00Z"));
        assert_eq!(fields.end_time, fixed_time("2024-05-01T15:00:00Z"));
        assert!(!fields.all_day);
    }

    #[test]
    fn private_metadata_links_event_to_job_and_schedule_event() {
        let mut event = timed_event("evt-2", "2024-05-01T09:00:00Z", "2024-05-01T10:00:00Z");
        event.extended_properties = Some(CalendarEventExtendedProperties {
            private: HashMap::from([
                (KEY_JOB_ID.to_string(), "J1".to_string()),
                (KEY_SCHEDULE_EVENT_ID.to_string(), "sev-7".to_string()),
            ]),
        });

        match parse_remote_event(&event, "primary", Tz::UTC) {
            Some(ParsedEvent::Linked { schedule_event_id, job_id, .. }) => {
                assert_eq!(job_id, "J1");
                assert_eq!(schedule_event_id.as_deref(), Some("sev-7"));
            }
            other => panic!("expected linked candidate, got {other:?}"),
        }
    }

    #[test]
    fn description_job_line_links_event_without_metadata() {
        let mut event = timed_event("evt-3", "2024-05-01T09:00:00Z", "2024-05-01T10:00:00Z");
        event.description = Some("Bring the duct blaster\njob id:  J42 \n".to_string());

        match parse_remote_event(&event, "primary", Tz::UTC) {
            Some(ParsedEvent::Linked { schedule_event_id, job_id, .. }) => {
                assert_eq!(job_id, "J42");
                assert!(schedule_event_id.is_none());
            }
            other => panic!("expected linked candidate, got {other:?}"),
        }
    }

    #[test]
    fn all_day_event_lands_on_local_midnight_across_dst() {
        let event = GoogleCalendarEvent {
            id: Some("evt-allday".to_string()),
            start: CalendarEventDateTime::all_day(
                NaiveDate::from_ymd_opt(2024, 3, 10).expect("date"),
            ),
            end: CalendarEventDateTime::all_day(
                NaiveDate::from_ymd_opt(2024, 3, 11).expect("date"),
            ),
            ..GoogleCalendarEvent::default()
        };
        let parsed = parse_remote_event(&event, "primary", chrono_tz::America::New_York)
            .expect("usable event");

        let fields = parsed.fields();
        assert!(fields.all_day);
        assert_eq!(fields.start_time, fixed_time("2024-03-10T05:00:00Z"));
        assert_eq!(fields.end_time, fixed_time("2024-03-11T04:00:00Z"));
        assert_eq!(fields.title, UNTITLED_EVENT);
    }

    #[test]
    fn floating_time_uses_event_time_zone() {
        let mut event = timed_event("evt-float", "2024-07-01T08:00:00", "2024-07-01T09:00:00");
        event.start.time_zone = Some("America/Chicago".to_string());
        event.end.time_zone = Some("America/Chicago".to_string());
        let parsed = parse_remote_event(&event, "primary", Tz::UTC).expect("usable event");
        assert_eq!(parsed.fields().start_time, fixed_time("2024-07-01T13:00:00Z"));
        assert_eq!(parsed.fields().end_time, fixed_time("2024-07-01T14:00:00Z"));

        let mut floating = timed_event("evt-float-2", "2024-07-01T08:00:00", "2024-07-01T09:00:00");
        floating.start.time_zone = None;
        let parsed = parse_remote_event(&floating, "primary", chrono_tz::America::Denver)
            .expect("usable event");
        assert_eq!(parsed.fields().start_time, fixed_time("2024-07-01T14:00:00Z"));
    }

    #[test]
    fn structurally_unusable_events_are_rejected() {
        let missing_times = GoogleCalendarEvent {
            id: Some("evt-x".to_string()),
            ..GoogleCalendarEvent::default()
        };
        assert!(parse_remote_event(&missing_times, "primary", Tz::UTC).is_none());

        let garbage = timed_event("evt-y", "not-a-time", "2024-05-01T10:00:00Z");
        assert!(parse_remote_event(&garbage, "primary", Tz::UTC).is_none());

        let inverted = timed_event("evt-z", "2024-05-01T10:00:00Z", "2024-05-01T09:00:00Z");
        assert!(parse_remote_event(&inverted, "primary", Tz::UTC).is_none());

        let no_id = timed_event("  ", "2024-05-01T09:00:00Z", "2024-05-01T10:00:00Z");
        assert!(parse_remote_event(&no_id, "primary", Tz::UTC).is_none());

        let mut cancelled = timed_event("evt-c", "2024-05-01T09:00:00Z", "2024-05-01T10:00:00Z");
        cancelled.status = Some("cancelled".to_string());
        assert!(parse_remote_event(&cancelled, "primary", Tz::UTC).is_none());
    }

    #[test]
    fn encoded_event_is_recognised_as_linked_on_the_way_back() {
        let job = sample_job();
        let mut local = ScheduleEvent::new(
            "sev-100",
            &job.id,
            "Lot 14 final",
            fixed_time("2024-05-01T09:00:00Z"),
            fixed_time("2024-05-01T11:00:00Z"),
        );
        local.notes = Some("Gate code 1234".to_string());
        local.color = Some("#0B8043".to_string());

        let mut encoded = encode_schedule_event(&local, &job);
        assert_eq!(encoded.color_id.as_deref(), Some("10"));
        assert_eq!(encoded.location.as_deref(), Some("14 Elm St"));
        assert_eq!(
            encoded.description.as_deref(),
            Some("Gate code 1234\n\nJob ID: J1")
        );

        encoded.id = Some("remote-1".to_string());
        match parse_remote_event(&encoded, "primary", Tz::UTC) {
            Some(ParsedEvent::Linked { schedule_event_id, job_id, fields }) => {
                assert_eq!(schedule_event_id.as_deref(), Some("sev-100"));
                assert_eq!(job_id, "J1");
                assert_eq!(fields.start_time, local.start_time);
                assert_eq!(fields.color.as_deref(), Some("#0b8043"));
            }
            other => panic!("expected linked candidate, got {other:?}"),
        }
    }

    #[test]
    fn encoding_does_not_repeat_existing_job_line() {
        let job = sample_job();
        let mut local = ScheduleEvent::new(
            "sev-101",
            &job.id,
            "Rough-in",
            fixed_time("2024-05-01T09:00:00Z"),
            fixed_time("2024-05-01T10:00:00Z"),
        );
        local.notes = Some("Job ID: J1".to_string());
        let encoded = encode_schedule_event(&local, &job);
        assert_eq!(encoded.description.as_deref(), Some("Job ID: J1"));
    }
}
