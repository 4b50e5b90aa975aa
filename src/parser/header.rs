//! WMO abbreviated heading and AWIPS identifier extraction.

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::error::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub ttaaii: String,
    pub cccc: String,
    pub ddhhmm: String,
    pub bbb: Option<String>,
    pub awips_id: Option<String>,
    /// `ttaaii+cccc+ddhhmm`
    pub wmo: String,
}

/// Parse the WMO line (first non-blank line) and the AWIPS line (first
/// non-blank line after it). Everything past that (the MND block) is
/// free text and not required for correctness; this crate only needs the
/// day/hour/minute to disambiguate `issued_at` against the envelope's
/// `issue` timestamp.
pub fn parse_header(text: &str) -> Result<Header, ParseError> {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());

    let wmo_line = lines.next().ok_or(ParseError::MissingWmoHeader)?;
    let mut parts = wmo_line.split_whitespace();
    let ttaaii = parts.next().ok_or(ParseError::MissingWmoHeader)?;
    let cccc = parts.next().ok_or(ParseError::MissingWmoHeader)?;
    let ddhhmm = parts.next().ok_or(ParseError::MissingWmoHeader)?;
    let bbb = parts.next().map(str::to_string);

    if ttaaii.len() != 6 || !ttaaii.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ParseError::MissingWmoHeader);
    }
    if cccc.len() != 4 {
        return Err(ParseError::MissingWmoHeader);
    }
    if ddhhmm.len() != 6 || !ddhhmm.chars().all(|c| c.is_ascii_digit()) {
        return Err(ParseError::MissingWmoHeader);
    }

    let awips_id = lines
        .next()
        .filter(|l| {
            (3..=6).contains(&l.len()) && l.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .map(str::to_string);

    let wmo = format!("{ttaaii}{cccc}{ddhhmm}");

    Ok(Header {
        ttaaii: ttaaii.to_string(),
        cccc: cccc.to_string(),
        ddhhmm: ddhhmm.to_string(),
        bbb,
        awips_id,
        wmo,
    })
}

/// Resolve `issued_at` by combining the WMO heading's `ddhhmm` (UTC
/// day-hour-minute within the current month) with the envelope's
/// `issue` timestamp for month/year disambiguation.
///
/// The envelope timestamp is authoritative for month/year; the WMO
/// heading is authoritative for day/hour/minute, since that's what the
/// office actually transmitted. Most of the time these agree exactly —
/// this only matters near a month boundary, where `envelope_issue` might
/// already have rolled over while the WMO heading hasn't (or vice
/// versa).
pub fn resolve_issued_at(ddhhmm: &str, envelope_issue: DateTime<Utc>) -> DateTime<Utc> {
    let day: u32 = ddhhmm[0..2].parse().unwrap_or_else(|_| envelope_issue.day());
    let hour: u32 = ddhhmm[2..4].parse().unwrap_or_else(|_| envelope_issue.hour());
    let minute: u32 = ddhhmm[4..6].parse().unwrap_or(0);

    let candidate = envelope_issue
        .with_day(day)
        .and_then(|d| d.with_hour(hour))
        .and_then(|d| d.with_minute(minute))
        .and_then(|d| d.with_second(0))
        .and_then(|d| d.with_nanosecond(0));

    match candidate {
        // Crossed a month boundary (e.g. WMO day 01 near envelope day 30):
        // trust the envelope's month/year instead of guessing.
        Some(c) if envelope_issue.day() > 25 && day < 5 && c < envelope_issue => envelope_issue,
        Some(c) => c,
        None => envelope_issue,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOR_TOP: &str = "WFUS53 KTOP 151830\nTORTOP\n\n...TORNADO EMERGENCY FOR TOPEKA...\n";

    #[test]
    fn parses_wmo_and_awips() {
        let h = parse_header(TOR_TOP).unwrap();
        assert_eq!(h.ttaaii, "WFUS53");
        assert_eq!(h.cccc, "KTOP");
        assert_eq!(h.ddhhmm, "151830");
        assert_eq!(h.awips_id.as_deref(), Some("TORTOP"));
        assert_eq!(h.wmo, "WFUS53KTOP151830");
    }

    #[test]
    fn rejects_missing_header() {
        assert!(parse_header("").is_err());
        assert!(parse_header("not a valid heading at all").is_err());
    }

    #[test]
    fn resolves_issued_at_from_ddhhmm() {
        let envelope = DateTime::parse_from_rfc3339("2024-01-15T18:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let resolved = resolve_issued_at("151830", envelope);
        assert_eq!(resolved, envelope);
    }
}
