use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::VetlineError;
use crate::geo::GeoPoint;

/// Typical response time assumed when a roster entry does not declare one.
pub const DEFAULT_RESPONSE_MINUTES: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Availability {
    Available = 0,
    Busy = 1,
    Offline = 2,
}

impl Availability {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Availability::Available),
            1 => Some(Availability::Busy),
            2 => Some(Availability::Offline),
            _ => None,
        }
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Availability::Available => "available",
            Availability::Busy => "busy",
            Availability::Offline => "offline",
        };
        f.write_str(s)
    }
}

impl FromStr for Availability {
    type Err = VetlineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "available" => Ok(Availability::Available),
            "busy" => Ok(Availability::Busy),
            "offline" => Ok(Availability::Offline),
            other => Err(VetlineError::validation(format!(
                "unknown availability '{}' (expected available, busy or offline)",
                other
            ))),
        }
    }
}

fn default_availability() -> Availability {
    Availability::Available
}

fn default_response_minutes() -> u32 {
    DEFAULT_RESPONSE_MINUTES
}

/// A veterinarian eligible to be matched to emergency requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Responder {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub specialties: BTreeSet<String>,
    #[serde(default)]
    pub equipment: BTreeSet<String>,
    pub location: GeoPoint,
    pub rating_average: f64,
    #[serde(default)]
    pub rating_count: u32,
    #[serde(default = "default_availability")]
    pub availability: Availability,
    #[serde(default)]
    pub experience_years: u32,
    #[serde(default = "default_response_minutes")]
    pub response_minutes: u32,
}

impl Responder {
    pub fn validate(&self) -> Result<(), VetlineError> {
        if self.id.trim().is_empty() {
            return Err(VetlineError::validation("responder id cannot be empty"));
        }
        if !self.location.is_valid() {
            return Err(VetlineError::validation(format!(
                "responder {} has invalid coordinates",
                self.id
            )));
        }
        if !(0.0..=5.0).contains(&self.rating_average) {
            return Err(VetlineError::validation(format!(
                "responder {} rating must be within 0-5, got {}",
                self.id, self.rating_average
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn responder() -> Responder {
        Responder {
            id: "vet-1".to_string(),
            name: "Dra. María González".to_string(),
            specialties: BTreeSet::from(["emergency".to_string()]),
            equipment: BTreeSet::new(),
            location: GeoPoint::new(-34.6037, -58.3816),
            rating_average: 4.9,
            rating_count: 127,
            availability: Availability::Available,
            experience_years: 12,
            response_minutes: 4,
        }
    }

    #[test]
    fn test_availability_u8_mapping() {
        for a in [Availability::Available, Availability::Busy, Availability::Offline] {
            assert_eq!(Availability::from_u8(a.as_u8()), Some(a));
        }
        assert_eq!(Availability::from_u8(9), None);
    }

    #[test]
    fn test_availability_parse_is_case_insensitive() {
        assert_eq!("Busy".parse::<Availability>().unwrap(), Availability::Busy);
        assert!(matches!(
            "sleeping".parse::<Availability>(),
            Err(VetlineError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_rejects_out_of_range_rating() {
        let mut r = responder();
        assert!(r.validate().is_ok());
        r.rating_average = 5.5;
        assert!(r.validate().is_err());
    }

    #[test]
    fn test_deserialize_applies_defaults() {
        let r: Responder = serde_json::from_value(serde_json::json!({
            "id": "vet-9",
            "name": "Dr. Juan Pérez",
            "location": { "lat": -34.62, "lng": -58.44 },
            "rating_average": 4.7
        }))
        .unwrap();
        assert_eq!(r.availability, Availability::Available);
        assert_eq!(r.response_minutes, DEFAULT_RESPONSE_MINUTES);
        assert!(r.specialties.is_empty());
    }
}
