use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::GeoDescriptor;

/// The canonical pipeline event produced by the parser (C1) and carried,
/// unmutated, through the pipeline (C4) to every sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherEvent {
    /// Assigned at parse time; stable identity for this event instance.
    pub event_id: uuid::Uuid,

    /// `cccc ‖ awips_id ‖ issued_at`
    pub product_id: String,

    /// `ttaaii+cccc+ddhhmm`, reconstructed from the WMO heading.
    pub wmo: String,

    pub awips_id: String,
    pub cccc: String,

    /// First three characters of the AWIPS ID by default.
    pub product_category: String,

    pub issued_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,

    pub text: String,
    pub segments: Vec<Segment>,

    /// Stable hash used for duplicate suppression.
    pub fingerprint: u64,
}

impl WeatherEvent {
    /// The `(cccc, awips_id)` origin pair used for the per-origin FIFO
    /// ordering guarantee.
    pub fn origin_pair(&self) -> (&str, &str) {
        (&self.cccc, &self.awips_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub ugc_codes: BTreeSet<String>,
    pub ugc_expires_at: DateTime<Utc>,
    pub vtec: Vec<Vtec>,
    pub h_vtec: Option<HVtec>,
    pub headlines: Vec<String>,
    pub polygon: Option<Vec<LatLon>>,
    pub time_mot_loc: Option<TimeMotLoc>,
    pub ibw_tags: BTreeMap<String, String>,

    /// Resolved geo descriptors for each code in `ugc_codes`, in the
    /// same iteration order. Empty when C2 had no match for any code.
    pub geo: Vec<GeoDescriptor>,
}

impl Segment {
    /// Whether `ugc_codes` are county codes (`C` prefix form) as opposed
    /// to zone codes (`Z` prefix form). Invariant 1: a segment
    /// never mixes both.
    pub fn ugc_kind(&self) -> Option<UgcKind> {
        self.ugc_codes.iter().next().and_then(|c| {
            c.chars().nth(2).and_then(|ch| match ch {
                'C' => Some(UgcKind::County),
                'Z' => Some(UgcKind::Zone),
                _ => None,
            })
        })
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum UgcKind {
    County,
    Zone,
}

/// Decimal-degree coordinate pair, rounded to two decimal places, always
/// stored west-negative (see DESIGN.md).
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeMotLoc {
    pub time: DateTime<Utc>,
    pub direction_deg: u16,
    pub speed_kt: u16,
    pub locations: Vec<LatLon>,
}

/// Primary Valid Time Event Code (P-VTEC).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vtec {
    pub fixed: VtecProductStatus,
    pub action: VtecAction,
    pub office: String,
    pub phenomenon: String,
    pub significance: VtecSignificance,
    pub etn: u16,
    pub begin: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum VtecProductStatus {
    Operational,
    Test,
    Experimental,
    ExperimentalInOperational,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum VtecAction {
    New,
    Con,
    Ext,
    Exa,
    Exb,
    Can,
    Upg,
    Exp,
    Rou,
    Cor,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum VtecSignificance {
    Warning,
    Watch,
    Advisory,
    Statement,
    Forecast,
    Outlook,
    Synopsis,
}

/// Hydrologic VTEC (H-VTEC), present only alongside a P-VTEC whose
/// phenomenon is in {FF, FA, FL, HY}.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HVtec {
    pub nwsli: String,
    pub severity: HVtecSeverity,
    pub immediate_cause: String,
    pub flood_begin: Option<DateTime<Utc>>,
    pub flood_crest: Option<DateTime<Utc>>,
    pub flood_end: Option<DateTime<Utc>>,
    pub record_status: RecordStatus,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum HVtecSeverity {
    None,
    Minor,
    Moderate,
    Major,
    Unknown,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum RecordStatus {
    /// OO — a new record on an old stream.
    OldOld,
    /// NO — a new stream, not a record.
    NewOld,
    /// NR — a new record.
    NewRecord,
    /// UU — record status not applicable/unknown.
    Unknown,
}
