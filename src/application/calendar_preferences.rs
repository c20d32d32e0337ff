use crate::domain::models::{CalendarPreference, PRIMARY_CALENDAR_ID};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::google_calendar_client::GoogleCalendarClient;
use crate::infrastructure::persistence::CalendarPreferenceRepository;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResult {
    pub added: Vec<String>,
    pub refreshed: Vec<String>,
    pub preferences: Vec<CalendarPreference>,
}

/// Decides which calendars a pass pulls from.
pub struct CalendarPreferenceService<'a, S>
where
    S: CalendarPreferenceRepository + ?Sized,
{
    store: &'a S,
}

impl<'a, S> CalendarPreferenceService<'a, S>
where
    S: CalendarPreferenceRepository + ?Sized,
{
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Enabled calendar ids. With no recorded preferences this is just the primary calendar.
    pub fn resolve_sync_targets(&self) -> Result<BTreeSet<String>, InfraError> {
        let preferences = self.store.list_preferences()?;
        if preferences.is_empty() {
            return Ok(BTreeSet::from([PRIMARY_CALENDAR_ID.to_string()]));
        }
        Ok(preferences
            .into_iter()
            .filter(|preference| preference.is_enabled)
            .map(|preference| preference.calendar_id)
            .collect())
    }

    pub async fn discover_calendars<C>(&self, client: &C) -> Result<DiscoveryResult, InfraError>
    where
        C: GoogleCalendarClient + ?Sized,
    {
        let calendars = client.list_calendars().await?;
        let mut added = Vec::new();
        let mut refreshed = Vec::new();

        for calendar in calendars {
            let mut preference = CalendarPreference::discovered(&calendar.id, &calendar.summary);
            preference.background_color = calendar.background_color.clone();
            preference.is_primary = preference.is_primary || calendar.primary;
            if self.store.insert_preference_if_absent(&preference)? {
                info!(calendar_id = %preference.calendar_id, "discovered calendar");
                added.push(preference.calendar_id);
            } else {
                self.store.refresh_preference_metadata(
                    &calendar.id,
                    &calendar.summary,
                    calendar.background_color.as_deref(),
                    preference.is_primary,
                )?;
                refreshed.push(preference.calendar_id);
            }
        }

        Ok(DiscoveryResult {
            added,
            refreshed,
            preferences: self.store.list_preferences()?,
        })
    }

    pub fn set_calendar_enabled(
        &self,
        calendar_id: &str,
        enabled: bool,
    ) -> Result<CalendarPreference, InfraError> {
        let calendar_id = normalized_calendar_id(calendar_id)?;
        let mut preference = CalendarPreference::discovered(calendar_id, calendar_id);
        preference.is_enabled = enabled;
        if !self.store.insert_preference_if_absent(&preference)? {
            self.store.set_preference_enabled(calendar_id, enabled)?;
        }
        info!(calendar_id, enabled, "calendar sync preference changed");
        self.store
            .get_preference(calendar_id)?
            .ok_or_else(|| InfraError::NotFound(format!("calendar preference {calendar_id}")))
    }

    /// Stamps `last_synced_at` without touching the user's enabled choice.
    pub fn mark_calendar_synced(
        &self,
        calendar_id: &str,
        synced_at: DateTime<Utc>,
    ) -> Result<(), InfraError> {
        let calendar_id = normalized_calendar_id(calendar_id)?;
        let mut preference = CalendarPreference::discovered(calendar_id, calendar_id);
        preference.last_synced_at = Some(synced_at);
        if !self.store.insert_preference_if_absent(&preference)? {
            self.store.set_preference_synced_at(calendar_id, synced_at)?;
        }
        debug!(calendar_id, "calendar marked synced");
        Ok(())
    }

    pub fn list_preferences(&self) -> Result<Vec<CalendarPreference>, InfraError> {
        self.store.list_preferences()
    }
}

fn normalized_calendar_id(calendar_id: &str) -> Result<&str, InfraError> {
    let calendar_id = calendar_id.trim();
    if calendar_id.is_empty() {
        return Err(InfraError::InvalidConfig(
            "calendar_id must not be empty".to_string(),
        ));
    }
    Ok(calendar_id)
}
