//! Profile form input and its validation.

use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::agent_api::BirthDetailPayload;
use crate::error::{FieldError, ValidationError};
use crate::model::{NewProfile, Profile};

/// Raw values from the profile form, before validation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileDraft {
    pub name: String,
    pub birth_date: Option<NaiveDate>,
    pub birth_time: Option<NaiveTime>,
    /// (latitude, longitude) picked on the map or from a place search
    pub position: Option<(f64, f64)>,
    /// Display name of the picked place, if geocoding produced one
    pub birth_place: Option<String>,
}

impl ProfileDraft {
    /// Check every field and build the store input.
    ///
    /// All problems are reported together so a form can mark each field.
    pub fn validate(&self) -> Result<NewProfile, ValidationError> {
        let mut errors = Vec::new();

        let name = self.name.trim();
        if name.is_empty() {
            errors.push(FieldError::new("name", "Name is required"));
        }
        if self.birth_date.is_none() {
            errors.push(FieldError::new("dob", "Date of Birth is required"));
        }
        if self.birth_time.is_none() {
            errors.push(FieldError::new("tob", "Time of Birth is required"));
        }
        match self.position {
            None => errors.push(FieldError::new(
                "location",
                "Please select a location on the map or search",
            )),
            Some((lat, lon)) if !valid_coordinates(lat, lon) => errors.push(FieldError::new(
                "location",
                format!("Coordinates out of range: {}, {}", lat, lon),
            )),
            Some(_) => {}
        }

        match (self.birth_date, self.birth_time, self.position) {
            (Some(date), Some(time), Some((latitude, longitude))) if errors.is_empty() => {
                let birth_place = self
                    .birth_place
                    .as_deref()
                    .map(str::trim)
                    .filter(|p| !p.is_empty() && *p != "unknown")
                    .map(str::to_string)
                    .unwrap_or_else(|| fallback_place_name(latitude, longitude));

                Ok(NewProfile {
                    name: name.to_string(),
                    birth_date_time: Utc.from_utc_datetime(&date.and_time(time)),
                    birth_place,
                    latitude,
                    longitude,
                    remote_session_token: None,
                })
            }
            _ => Err(ValidationError::Profile(errors)),
        }
    }
}

fn valid_coordinates(lat: f64, lon: f64) -> bool {
    (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}

/// Place label used when reverse geocoding has nothing better
pub fn fallback_place_name(lat: f64, lon: f64) -> String {
    format!("Location at {:.4}, {:.4}", lat, lon)
}

impl From<&NewProfile> for BirthDetailPayload {
    fn from(p: &NewProfile) -> Self {
        Self {
            name: p.name.clone(),
            birth_date_time: p.birth_date_time,
            birth_place: p.birth_place.clone(),
            latitude: p.latitude,
            longitude: p.longitude,
        }
    }
}

impl From<&Profile> for BirthDetailPayload {
    fn from(p: &Profile) -> Self {
        Self {
            name: p.name.clone(),
            birth_date_time: p.birth_date_time,
            birth_place: p.birth_place.clone(),
            latitude: p.latitude,
            longitude: p.longitude,
        }
    }
}
