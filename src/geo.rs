//! Geographic lookup (C2): resolves UGC codes to human-readable
//! descriptors over a small bundled static dataset. Read-only and
//! immutable for the process lifetime — safe to share across
//! parser tasks behind an `Arc` with no locking.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::GeoError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoDescriptor {
    pub name: String,
    pub state: String,
    pub kind: GeoKind,
    pub code: String,
    pub centroid: LatLon,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum GeoKind {
    County,
    Zone,
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

/// A read-only, in-memory UGC → descriptor table.
///
/// `GeoLookup::bundled()` loads the small dataset baked into the binary
/// (enough for tests and for offices exercised by the bundled scenarios);
/// production deployments load a larger dataset externally and pass it to
/// [`GeoLookup::from_entries`]. Hot-reloading a dataset is explicitly out
/// of scope — a new `GeoLookup` is the only way to pick up
/// updated data.
#[derive(Debug, Clone)]
pub struct GeoLookup {
    table: HashMap<String, GeoDescriptor>,
}

impl GeoLookup {
    pub fn from_entries(entries: Vec<GeoDescriptor>) -> Result<Self, GeoError> {
        let mut table = HashMap::with_capacity(entries.len());
        for entry in entries {
            table.insert(entry.code.clone(), entry);
        }
        Ok(Self { table })
    }

    /// The small dataset bundled with the binary, covering the UGC codes
    /// exercised by this repository's own test fixtures.
    pub fn bundled() -> Self {
        Self::from_entries(bundled_entries()).expect("bundled dataset is well-formed")
    }

    /// Resolve a single UGC code. A miss returns `None`, not an error.
    pub fn resolve(&self, ugc_code: &str) -> Option<&GeoDescriptor> {
        self.table.get(ugc_code)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

fn bundled_entries() -> Vec<GeoDescriptor> {
    vec![
        GeoDescriptor {
            name: "Shawnee".into(),
            state: "KS".into(),
            kind: GeoKind::County,
            code: "KSC177".into(),
            centroid: LatLon {
                lat: 39.03,
                lon: -95.68,
            },
        },
        GeoDescriptor {
            name: "Topeka".into(),
            state: "KS".into(),
            kind: GeoKind::County,
            code: "KSC023".into(),
            centroid: LatLon {
                lat: 39.06,
                lon: -95.68,
            },
        },
        GeoDescriptor {
            name: "Arkansas River Near Pueblo".into(),
            state: "CO".into(),
            kind: GeoKind::County,
            code: "ARKC2".into(),
            centroid: LatLon {
                lat: 38.26,
                lon: -104.61,
            },
        },
        GeoDescriptor {
            name: "Boulder".into(),
            state: "CO".into(),
            kind: GeoKind::County,
            code: "COC013".into(),
            centroid: LatLon {
                lat: 40.09,
                lon: -105.36,
            },
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_bundled_code() {
        let geo = GeoLookup::bundled();
        let entry = geo.resolve("KSC023").expect("present");
        assert_eq!(entry.name, "Topeka");
    }

    #[test]
    fn missing_code_is_none_not_error() {
        let geo = GeoLookup::bundled();
        assert!(geo.resolve("ZZZ999").is_none());
    }
}
