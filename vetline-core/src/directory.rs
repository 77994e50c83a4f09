//! Responder directory - the roster of veterinarians and their live availability.
//!
//! Profiles are immutable once registered; availability lives in a per-responder
//! atomic cell, so availability writes never take the roster lock and
//! `list_available` never waits on a writer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::VetlineError;
use crate::geo::GeoPoint;
use crate::models::{Availability, Responder};

/// A responder together with its distance from a search center.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearbyResponder {
    pub responder: Responder,
    pub distance_km: f64,
}

#[derive(Debug)]
struct DirectoryEntry {
    profile: Responder,
    availability: AtomicU8,
}

impl DirectoryEntry {
    fn new(profile: Responder) -> Self {
        let availability = AtomicU8::new(profile.availability.as_u8());
        Self {
            profile,
            availability,
        }
    }

    fn availability(&self) -> Availability {
        Availability::from_u8(self.availability.load(Ordering::Acquire))
            .unwrap_or(Availability::Offline)
    }

    fn snapshot(&self) -> Responder {
        let mut responder = self.profile.clone();
        responder.availability = self.availability();
        responder
    }

    fn compare_and_set(&self, expected: Availability, next: Availability) -> Result<(), Availability> {
        self.availability
            .compare_exchange(
                expected.as_u8(),
                next.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(|actual| Availability::from_u8(actual).unwrap_or(Availability::Offline))
    }
}

#[derive(Debug, Default)]
pub struct ResponderDirectory {
    entries: RwLock<HashMap<String, Arc<DirectoryEntry>>>,
}

impl ResponderDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a directory from a seeded roster, rejecting invalid or duplicate entries.
    pub fn from_responders(responders: Vec<Responder>) -> Result<Self, VetlineError> {
        let directory = Self::new();
        for responder in responders {
            directory.register(responder)?;
        }
        Ok(directory)
    }

    pub fn register(&self, responder: Responder) -> Result<(), VetlineError> {
        responder.validate()?;
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.contains_key(&responder.id) {
            return Err(VetlineError::conflict(format!(
                "responder {} is already registered",
                responder.id
            )));
        }
        tracing::debug!(responder_id = %responder.id, "Registered responder");
        entries.insert(responder.id.clone(), Arc::new(DirectoryEntry::new(responder)));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, responder_id: &str) -> Option<Responder> {
        self.entry(responder_id).map(|e| e.snapshot())
    }

    /// All responders, ordered by id.
    pub fn all(&self) -> Vec<Responder> {
        let mut all: Vec<Responder> = self
            .entries()
            .iter()
            .map(|e| e.snapshot())
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Available responders within `radius_km` of `center`, nearest first.
    pub fn list_available(&self, center: &GeoPoint, radius_km: f64) -> Vec<NearbyResponder> {
        let mut nearby: Vec<NearbyResponder> = self
            .entries()
            .iter()
            .filter(|e| e.availability() == Availability::Available)
            .filter_map(|e| {
                let distance_km = center.distance_km(&e.profile.location);
                (distance_km <= radius_km).then(|| NearbyResponder {
                    responder: e.snapshot(),
                    distance_km,
                })
            })
            .collect();

        nearby.sort_by(|a, b| {
            a.distance_km
                .total_cmp(&b.distance_km)
                .then_with(|| a.responder.id.cmp(&b.responder.id))
        });
        nearby
    }

    /// Set one responder's availability, returning the previous value.
    pub fn set_availability(
        &self,
        responder_id: &str,
        availability: Availability,
    ) -> Result<Availability, VetlineError> {
        let entry = self
            .entry(responder_id)
            .ok_or_else(|| VetlineError::not_found(format!("responder {}", responder_id)))?;
        let previous = entry.availability.swap(availability.as_u8(), Ordering::AcqRel);
        let previous = Availability::from_u8(previous).unwrap_or(Availability::Offline);
        tracing::info!(
            responder_id = %responder_id,
            from = %previous,
            to = %availability,
            "Responder availability changed"
        );
        Ok(previous)
    }

    /// Atomically move a responder from Available to Busy.
    pub fn claim(&self, responder_id: &str) -> Result<(), VetlineError> {
        let entry = self
            .entry(responder_id)
            .ok_or_else(|| VetlineError::not_found(format!("responder {}", responder_id)))?;
        entry
            .compare_and_set(Availability::Available, Availability::Busy)
            .map_err(|actual| {
                VetlineError::conflict(format!("responder {} is {}", responder_id, actual))
            })
    }

    /// Return a Busy responder to Available. Responders that went offline meanwhile stay offline.
    pub fn release(&self, responder_id: &str) -> Result<(), VetlineError> {
        let entry = self
            .entry(responder_id)
            .ok_or_else(|| VetlineError::not_found(format!("responder {}", responder_id)))?;
        if let Err(actual) = entry.compare_and_set(Availability::Busy, Availability::Available) {
            tracing::debug!(responder_id = %responder_id, availability = %actual, "Release skipped");
        }
        Ok(())
    }

    fn entry(&self, responder_id: &str) -> Option<Arc<DirectoryEntry>> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(responder_id)
            .cloned()
    }

    fn entries(&self) -> Vec<Arc<DirectoryEntry>> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    const CENTER: GeoPoint = GeoPoint {
        lat: -34.6037,
        lng: -58.3816,
    };

    /// A point `km` kilometres due north of `CENTER`.
    fn north_of_center(km: f64) -> GeoPoint {
        GeoPoint::new(CENTER.lat + km / 111.195, CENTER.lng)
    }

    fn responder(id: &str, km: f64, availability: Availability) -> Responder {
        Responder {
            id: id.to_string(),
            name: format!("Vet {}", id),
            specialties: BTreeSet::new(),
            equipment: BTreeSet::new(),
            location: north_of_center(km),
            rating_average: 4.5,
            rating_count: 10,
            availability,
            experience_years: 5,
            response_minutes: 5,
        }
    }

    // ========================================================================
    // TEST 1: list_available filters by radius and availability
    // ========================================================================
    #[test]
    fn test_list_available_filters_and_sorts() {
        let dir = ResponderDirectory::from_responders(vec![
            responder("c", 1.5, Availability::Available),
            responder("a", 0.8, Availability::Available),
            responder("busy", 0.2, Availability::Busy),
            responder("far", 3.1, Availability::Available),
            responder("off", 1.0, Availability::Offline),
        ])
        .unwrap();

        let nearby = dir.list_available(&CENTER, 2.0);
        let ids: Vec<&str> = nearby.iter().map(|n| n.responder.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert!(nearby[0].distance_km < nearby[1].distance_km);
    }

    // ========================================================================
    // TEST 2: equal distances tie-break by id
    // ========================================================================
    #[test]
    fn test_list_available_tie_breaks_by_id() {
        let dir = ResponderDirectory::from_responders(vec![
            responder("z", 1.0, Availability::Available),
            responder("m", 1.0, Availability::Available),
        ])
        .unwrap();
        let ids: Vec<String> = dir
            .list_available(&CENTER, 5.0)
            .into_iter()
            .map(|n| n.responder.id)
            .collect();
        assert_eq!(ids, vec!["m", "z"]);
    }

    // ========================================================================
    // TEST 3: set_availability mutates one record and reports unknown ids
    // ========================================================================
    #[test]
    fn test_set_availability() {
        let dir = ResponderDirectory::from_responders(vec![
            responder("a", 0.5, Availability::Available),
            responder("b", 0.6, Availability::Available),
        ])
        .unwrap();

        let previous = dir.set_availability("a", Availability::Offline).unwrap();
        assert_eq!(previous, Availability::Available);
        assert_eq!(dir.get("a").unwrap().availability, Availability::Offline);
        assert_eq!(dir.get("b").unwrap().availability, Availability::Available);

        let err = dir.set_availability("nope", Availability::Busy).unwrap_err();
        assert!(matches!(err, VetlineError::NotFound(_)));
    }

    // ========================================================================
    // TEST 4: claim is a compare-and-set; release only undoes Busy
    // ========================================================================
    #[test]
    fn test_claim_and_release() {
        let dir =
            ResponderDirectory::from_responders(vec![responder("a", 0.5, Availability::Available)])
                .unwrap();

        dir.claim("a").unwrap();
        assert_eq!(dir.get("a").unwrap().availability, Availability::Busy);
        assert!(matches!(dir.claim("a"), Err(VetlineError::Conflict(_))));

        dir.release("a").unwrap();
        assert_eq!(dir.get("a").unwrap().availability, Availability::Available);

        dir.set_availability("a", Availability::Offline).unwrap();
        dir.release("a").unwrap();
        assert_eq!(dir.get("a").unwrap().availability, Availability::Offline);
    }

    // ========================================================================
    // TEST 5: duplicate registration is rejected
    // ========================================================================
    #[test]
    fn test_duplicate_registration_rejected() {
        let result = ResponderDirectory::from_responders(vec![
            responder("a", 0.5, Availability::Available),
            responder("a", 0.9, Availability::Available),
        ]);
        assert!(matches!(result, Err(VetlineError::Conflict(_))));
    }

    // ========================================================================
    // TEST 6: concurrent availability updates stay per-record consistent
    // ========================================================================
    #[test]
    fn test_concurrent_updates_do_not_corrupt() {
        let ids: Vec<String> = (0..16).map(|i| format!("vet-{:02}", i)).collect();
        let dir = Arc::new(
            ResponderDirectory::from_responders(
                ids.iter()
                    .map(|id| responder(id, 0.5, Availability::Available))
                    .collect(),
            )
            .unwrap(),
        );

        let handles: Vec<_> = ids
            .iter()
            .cloned()
            .map(|id| {
                let dir = Arc::clone(&dir);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let next = if i % 2 == 0 {
                            Availability::Busy
                        } else {
                            Availability::Offline
                        };
                        dir.set_availability(&id, next).unwrap();
                        let _ = dir.list_available(&CENTER, 10.0);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        // The last write of each thread was Offline (i = 199)
        for id in &ids {
            assert_eq!(dir.get(id).unwrap().availability, Availability::Offline);
        }
        assert_eq!(dir.len(), 16);
    }
}
