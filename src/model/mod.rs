mod event;
mod wire;

pub use event::{
    HVtec, HVtecSeverity, LatLon, RecordStatus, Segment, TimeMotLoc, UgcKind, Vtec, VtecAction,
    VtecProductStatus, VtecSignificance, WeatherEvent,
};
pub use wire::{EnvelopeError, WireMessage};
