use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_mapper::GoogleCalendarEvent;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, StatusCode};
use url::Url;

const CALENDAR_LIST_ENDPOINT: &str = "https://www.googleapis.com/calendar/v3/users/me/calendarList";
const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleCalendarSummary {
    pub id: String,
    pub summary: String,
    pub primary: bool,
    pub background_color: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct ListEventsRequest {
    pub time_min: DateTime<Utc>,
    pub time_max: DateTime<Utc>,
}

/// The calendar provider collaborator. Credentials are the implementation's concern.
#[async_trait]
pub trait GoogleCalendarClient: Send + Sync {
    async fn list_calendars(&self) -> Result<Vec<GoogleCalendarSummary>, InfraError>;

    async fn list_events(
        &self,
        calendar_id: &str,
        request: ListEventsRequest,
    ) -> Result<Vec<GoogleCalendarEvent>, InfraError>;

    async fn create_event(
        &self,
        calendar_id: &str,
        event: &GoogleCalendarEvent,
    ) -> Result<String, InfraError>;

    async fn update_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        event: &GoogleCalendarEvent,
    ) -> Result<(), InfraError>;

    async fn delete_event(&self, calendar_id: &str, event_id: &str) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestGoogleCalendarClient {
    client: Client,
    access_token: String,
}

impl ReqwestGoogleCalendarClient {
    pub fn new(access_token: impl Into<String>) -> Result<Self, InfraError> {
        let access_token = access_token.into();
        Self::ensure_non_empty(&access_token, "access token")?;
        Ok(Self {
            client: Client::new(),
            access_token: access_token.trim().to_string(),
        })
    }

    fn ensure_non_empty(value: &str, field: &str) -> Result<(), InfraError> {
        if value.trim().is_empty() {
            return Err(InfraError::InvalidConfig(format!("{field} must not be empty")));
        }
        Ok(())
    }

    fn http_error(status: StatusCode, body: &str, context: &str) -> InfraError {
        let message = if body.trim().is_empty() {
            format!("google calendar api error while {context}: http {}", status.as_u16())
        } else {
            format!(
                "google calendar api error while {context}: http {}; body={body}",
                status.as_u16()
            )
        };
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => InfraError::Authentication(message),
            StatusCode::NOT_FOUND | StatusCode::GONE => InfraError::NotFound(message),
            _ => InfraError::Provider(message),
        }
    }

    fn events_endpoint(calendar_id: &str) -> Result<Url, InfraError> {
        let mut url = Url::parse(CALENDAR_API_BASE).map_err(|error| {
            InfraError::Provider(format!("invalid calendar api base url: {error}"))
        })?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                InfraError::Provider("calendar api base URL cannot be a base".to_string())
            })?;
            segments.push("calendars");
            segments.push(calendar_id);
            segments.push("events");
        }
        Ok(url)
    }

    fn event_endpoint(calendar_id: &str, event_id: &str) -> Result<Url, InfraError> {
        let mut url = Self::events_endpoint(calendar_id)?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                InfraError::Provider("calendar events URL cannot be a base".to_string())
            })?;
            segments.push(event_id);
        }
        Ok(url)
    }

    async fn read_body(
        response: reqwest::Response,
        context: &str,
    ) -> Result<(StatusCode, String), InfraError> {
        let status = response.status();
        let body = response.text().await.map_err(|error| {
            InfraError::Provider(format!("network error while reading {context} response: {error}"))
        })?;
        if !status.is_success() {
            return Err(Self::http_error(status, &body, context));
        }
        Ok((status, body))
    }
}

#[derive(Debug, serde::Deserialize)]
struct CalendarListResponse {
    items: Option<Vec<CalendarListItem>>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct CalendarListItem {
    id: String,
    summary: Option<String>,
    #[serde(rename = "summaryOverride")]
    summary_override: Option<String>,
    #[serde(default)]
    primary: bool,
    #[serde(rename = "backgroundColor")]
    background_color: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct EventsPageResponse {
    items: Option<Vec<GoogleCalendarEvent>>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[async_trait]
impl GoogleCalendarClient for ReqwestGoogleCalendarClient {
    async fn list_calendars(&self) -> Result<Vec<GoogleCalendarSummary>, InfraError> {
        let mut page_token: Option<String> = None;
        let mut calendars = Vec::new();

        loop {
            let mut req = self
                .client
                .get(CALENDAR_LIST_ENDPOINT)
                .query(&[("maxResults", 250)])
                .bearer_auth(&self.access_token);
            if let Some(page_token) = page_token.as_deref() {
                req = req.query(&[("pageToken", page_token)]);
            }

            let response = req.send().await.map_err(|error| {
                InfraError::Provider(format!("network error while listing calendars: {error}"))
            })?;
            let (_, body) = Self::read_body(response, "listing calendars").await?;
            let parsed: CalendarListResponse = serde_json::from_str(&body).map_err(|error| {
                InfraError::Provider(format!("invalid calendar list payload: {error}; body={body}"))
            })?;

            calendars.extend(parsed.items.unwrap_or_default().into_iter().filter_map(|item| {
                let id = item.id.trim();
                if id.is_empty() {
                    return None;
                }
                let summary = item
                    .summary_override
                    .or(item.summary)
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty())
                    .unwrap_or_else(|| id.to_string());
                Some(GoogleCalendarSummary {
                    id: id.to_string(),
                    summary,
                    primary: item.primary,
                    background_color: item.background_color,
                })
            }));

            match parsed.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        Ok(calendars)
    }

    async fn list_events(
        &self,
        calendar_id: &str,
        request: ListEventsRequest,
    ) -> Result<Vec<GoogleCalendarEvent>, InfraError> {
        Self::ensure_non_empty(calendar_id, "calendar id")?;

        let endpoint = Self::events_endpoint(calendar_id)?;
        let time_min = request.time_min.to_rfc3339_opts(SecondsFormat::Secs, true);
        let time_max = request.time_max.to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut page_token: Option<String> = None;
        let mut events = Vec::new();

        loop {
            let mut req = self
                .client
                .get(endpoint.clone())
                .bearer_auth(&self.access_token)
                .query(&[
                    ("singleEvents", "true"),
                    ("maxResults", "2500"),
                    ("timeMin", time_min.as_str()),
                    ("timeMax", time_max.as_str()),
                ]);
            if let Some(page_token) = page_token.as_deref() {
                req = req.query(&[("pageToken", page_token)]);
            }

            let response = req.send().await.map_err(|error| {
                InfraError::Provider(format!(
                    "network error while listing calendar events: {error}"
                ))
            })?;
            let (_, body) = Self::read_body(response, "listing events").await?;
            let mut parsed: EventsPageResponse = serde_json::from_str(&body).map_err(|error| {
                InfraError::Provider(format!("invalid events list payload: {error}; body={body}"))
            })?;

            events.extend(parsed.items.take().unwrap_or_default());
            match parsed.next_page_token.take() {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        Ok(events)
    }

    async fn create_event(
        &self,
        calendar_id: &str,
        event: &GoogleCalendarEvent,
    ) -> Result<String, InfraError> {
        Self::ensure_non_empty(calendar_id, "calendar id")?;

        let endpoint = Self::events_endpoint(calendar_id)?;
        let response = self
            .client
            .post(endpoint)
            .bearer_auth(&self.access_token)
            .json(event)
            .send()
            .await
            .map_err(|error| {
                InfraError::Provider(format!("network error while creating event: {error}"))
            })?;
        let (_, body) = Self::read_body(response, "creating event").await?;

        let parsed: GoogleCalendarEvent = serde_json::from_str(&body).map_err(|error| {
            InfraError::Provider(format!("invalid event create payload: {error}; body={body}"))
        })?;
        parsed
            .remote_id()
            .map(ToOwned::to_owned)
            .ok_or_else(|| {
                InfraError::Provider("event create response did not include id".to_string())
            })
    }

    async fn update_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        event: &GoogleCalendarEvent,
    ) -> Result<(), InfraError> {
        Self::ensure_non_empty(calendar_id, "calendar id")?;
        Self::ensure_non_empty(event_id, "event id")?;

        let endpoint = Self::event_endpoint(calendar_id, event_id)?;
        let response = self
            .client
            .put(endpoint)
            .bearer_auth(&self.access_token)
            .json(event)
            .send()
            .await
            .map_err(|error| {
                InfraError::Provider(format!("network error while updating event: {error}"))
            })?;
        Self::read_body(response, "updating event").await?;
        Ok(())
    }

    async fn delete_event(&self, calendar_id: &str, event_id: &str) -> Result<(), InfraError> {
        Self::ensure_non_empty(calendar_id, "calendar id")?;
        Self::ensure_non_empty(event_id, "event id")?;

        let endpoint = Self::event_endpoint(calendar_id, event_id)?;
        let response = self
            .client
            .delete(endpoint)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|error| {
                InfraError::Provider(format!("network error while deleting event: {error}"))
            })?;
        Self::read_body(response, "deleting event").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_maps_to_error_kind() {
        let http_error = ReqwestGoogleCalendarClient::http_error;
        let auth = http_error(StatusCode::UNAUTHORIZED, "", "listing events");
        assert!(auth.is_authentication());
        let forbidden = http_error(StatusCode::FORBIDDEN, "denied", "listing events");
        assert!(forbidden.is_authentication());
        let gone = http_error(StatusCode::GONE, "", "updating event");
        assert!(gone.is_not_found());
        let unavailable = http_error(StatusCode::SERVICE_UNAVAILABLE, "", "listing events");
        assert!(unavailable.is_transient());
        let bad_request = http_error(StatusCode::BAD_REQUEST, "", "creating event");
        assert!(!bad_request.is_transient());
        assert!(!bad_request.is_authentication());
    }

    #[test]
    fn event_endpoint_escapes_calendar_ids() {
        let url =
            ReqwestGoogleCalendarClient::event_endpoint("crew@group.calendar.google.com", "abc 123")
                .expect("endpoint");
        assert_eq!(
            url.as_str(),
            "https://www.googleapis.com/calendar/v3/calendars/crew@group.calendar.google.com/events/abc%20123"
        );
    }

    #[test]
    fn empty_access_token_is_rejected() {
        assert!(matches!(
            ReqwestGoogleCalendarClient::new("  "),
            Err(InfraError::InvalidConfig(_))
        ));
    }
}
