use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::VetlineError;
use crate::geo::GeoPoint;

/// Upper bound on free-text fields accepted from requesters.
pub const MAX_DESCRIPTION_CHARS: usize = 4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Species {
    Dog,
    Cat,
    Bird,
    Rabbit,
    Other,
}

impl fmt::Display for Species {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Species::Dog => "dog",
            Species::Cat => "cat",
            Species::Bird => "bird",
            Species::Rabbit => "rabbit",
            Species::Other => "other",
        };
        f.write_str(s)
    }
}

impl FromStr for Species {
    type Err = VetlineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dog" => Ok(Species::Dog),
            "cat" => Ok(Species::Cat),
            "bird" => Ok(Species::Bird),
            "rabbit" => Ok(Species::Rabbit),
            "other" => Ok(Species::Other),
            "" => Err(VetlineError::validation("pet.species is required")),
            other => Err(VetlineError::validation(format!(
                "unknown species '{}' (expected dog, cat, bird, rabbit or other)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Open,
    Matched,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PetProfile {
    pub name: String,
    pub species: Species,
    pub age: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyRequest {
    pub id: Uuid,
    pub requester_location: GeoPoint,
    pub pet: PetProfile,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub status: RequestStatus,
}

/// Raw pet profile as submitted; every field is checked by `EmergencyRequest::from_input`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PetProfileInput {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub species: String,
    #[serde(default)]
    pub age: String,
}

/// Body of a request submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitRequestInput {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub pet: PetProfileInput,
    pub location: Option<GeoPoint>,
    /// Initial search radius; the configured default applies when absent.
    pub radius_km: Option<f64>,
}

impl EmergencyRequest {
    /// Validate a submission and build an `Open` request from it.
    pub fn from_input(input: &SubmitRequestInput, now: DateTime<Utc>) -> Result<Self, VetlineError> {
        let description = input.description.trim();
        if description.is_empty() {
            return Err(VetlineError::validation("description is required"));
        }
        if description.chars().count() > MAX_DESCRIPTION_CHARS {
            return Err(VetlineError::validation(format!(
                "description exceeds {} characters",
                MAX_DESCRIPTION_CHARS
            )));
        }

        let name = input.pet.name.trim();
        if name.is_empty() {
            return Err(VetlineError::validation("pet.name is required"));
        }
        let species: Species = input.pet.species.parse()?;
        let age = input.pet.age.trim();
        if age.is_empty() {
            return Err(VetlineError::validation("pet.age is required"));
        }

        let location = match input.location {
            Some(loc) if loc.is_valid() => loc,
            Some(_) => {
                return Err(VetlineError::validation(
                    "location must have lat within [-90, 90] and lng within [-180, 180]",
                ))
            }
            None => return Err(VetlineError::validation("location is required")),
        };

        Ok(Self {
            id: Uuid::new_v4(),
            requester_location: location,
            pet: PetProfile {
                name: name.to_string(),
                species,
                age: age.to_string(),
            },
            description: description.to_string(),
            created_at: now,
            status: RequestStatus::Open,
        })
    }
}
