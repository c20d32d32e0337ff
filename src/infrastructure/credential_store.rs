use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

pub const DEFAULT_CREDENTIAL_SERVICE: &str = "fieldsync.calendar.google";
pub const DEFAULT_CREDENTIAL_ACCOUNT: &str = "default";

/// Bearer credential for the calendar provider. Issuing and refreshing it is
/// handled outside this tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CalendarCredential {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl CalendarCredential {
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: default_token_type(),
            expires_at: None,
        }
    }

    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        !self.access_token.trim().is_empty()
            && self.expires_at.is_none_or(|expires_at| expires_at > now)
    }
}

pub trait CredentialStore: Send + Sync {
    fn save_credential(&self, credential: &CalendarCredential) -> Result<(), InfraError>;
    fn load_credential(&self) -> Result<Option<CalendarCredential>, InfraError>;
    fn delete_credential(&self) -> Result<(), InfraError>;
}

/// OS keyring entry holding the credential as JSON. The entry is opened on
/// first use and reused for the lifetime of the store.
#[derive(Debug)]
pub struct KeyringCredentialStore {
    service_name: String,
    account_name: String,
    entry: Mutex<Option<keyring::Entry>>,
}

impl KeyringCredentialStore {
    pub fn new(service_name: impl Into<String>, account_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            account_name: account_name.into(),
            entry: Mutex::new(None),
        }
    }

    fn with_entry<T>(
        &self,
        operation: impl FnOnce(&keyring::Entry) -> Result<T, InfraError>,
    ) -> Result<T, InfraError> {
        let mut guard = self
            .entry
            .lock()
            .map_err(|error| InfraError::Credential(format!("keyring lock poisoned: {error}")))?;
        if guard.is_none() {
            let entry = keyring::Entry::new(&self.service_name, &self.account_name)
                .map_err(|error| InfraError::Credential(error.to_string()))?;
            *guard = Some(entry);
        }
        match guard.as_ref() {
            Some(entry) => operation(entry),
            None => Err(InfraError::Credential("keyring entry unavailable".to_string())),
        }
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new(DEFAULT_CREDENTIAL_SERVICE, DEFAULT_CREDENTIAL_ACCOUNT)
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn save_credential(&self, credential: &CalendarCredential) -> Result<(), InfraError> {
        let payload = serde_json::to_string(credential)
            .map_err(|error| InfraError::Credential(error.to_string()))?;
        self.with_entry(|entry| {
            entry
                .set_password(&payload)
                .map_err(|error| InfraError::Credential(error.to_string()))
        })
    }

    fn load_credential(&self) -> Result<Option<CalendarCredential>, InfraError> {
        let payload = self.with_entry(|entry| match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(InfraError::Credential(error.to_string())),
        })?;
        payload
            .map(|payload| {
                serde_json::from_str::<CalendarCredential>(&payload)
                    .map_err(|error| InfraError::Credential(error.to_string()))
            })
            .transpose()
    }

    fn delete_credential(&self) -> Result<(), InfraError> {
        self.with_entry(|entry| match entry.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(InfraError::Credential(error.to_string())),
        })
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    credential: Mutex<Option<CalendarCredential>>,
}

impl CredentialStore for InMemoryCredentialStore {
    fn save_credential(&self, credential: &CalendarCredential) -> Result<(), InfraError> {
        let mut guard = self
            .credential
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        *guard = Some(credential.clone());
        Ok(())
    }

    fn load_credential(&self) -> Result<Option<CalendarCredential>, InfraError> {
        let guard = self
            .credential
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        Ok(guard.clone())
    }

    fn delete_credential(&self) -> Result<(), InfraError> {
        let mut guard = self
            .credential
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        *guard = None;
        Ok(())
    }
}
