//! Product parser (C1): turns a decoded [`crate::model::WireMessage`]
//! into a [`crate::model::WeatherEvent`].
//!
//! Stages run in a fixed order: WMO heading, UGC, VTEC, body (headlines
//! / IBW tags / polygon / TML), geo enrichment,
//! fingerprint. A segment with no UGC line is dropped with a soft
//! diagnostic rather than failing the whole product — most multi-segment
//! products carry a leading MND block with no UGC line of its own.

pub mod body;
pub mod fingerprint;
pub mod header;
pub mod ugc;
pub mod vtec;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::ParseError;
use crate::geo::GeoLookup;
use crate::model::{Segment, WeatherEvent, WireMessage};

/// Soft, non-fatal issues noticed while parsing. Surfaced to the caller so the
/// receiver can log or count them without failing the product.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseDiagnostics {
    pub soft_issues: Vec<String>,
}

impl ParseDiagnostics {
    fn note(&mut self, issue: impl Into<String>) {
        self.soft_issues.push(issue.into());
    }
}

/// Parse a wire message into a [`WeatherEvent`], enriching each segment's
/// UGC codes against `geo`.
pub fn parse(
    message: WireMessage,
    geo: &GeoLookup,
) -> Result<(WeatherEvent, ParseDiagnostics), ParseError> {
    let mut diagnostics = ParseDiagnostics::default();
    let text = message.body_text.as_str();

    let parsed_header = header::parse_header(text)?;
    let issued_at = header::resolve_issued_at(&parsed_header.ddhhmm, message.issued_at);

    // Prefer the envelope's awipsid; fall back to whatever the MND block
    // carries, since some offices omit it from the envelope attribute.
    let awips_id = message
        .awips_id
        .clone()
        .or_else(|| parsed_header.awips_id.clone())
        .unwrap_or_default();

    // Unknown/missing AWIPS IDs still produce an event; product_category
    // just degrades to whatever prefix is available.
    let product_category = awips_id
        .get(0..3.min(awips_id.len()))
        .unwrap_or(&awips_id)
        .to_string();

    let mut segments = Vec::new();
    for chunk in split_segments(text) {
        match parse_segment(&chunk, issued_at, geo, &mut diagnostics)? {
            Some(segment) => segments.push(segment),
            None => {}
        }
    }

    if segments.is_empty() {
        return Err(ParseError::Structural(
            "no segment with a parseable UGC line found in product text".to_string(),
        ));
    }

    for segment in &segments {
        for v in &segment.vtec {
            if vtec::requires_h_vtec(&v.phenomenon) && segment.h_vtec.is_none() {
                diagnostics.note(format!(
                    "phenomenon {} requires an H-VTEC line but none was found",
                    v.phenomenon
                ));
            }
        }
    }

    let fp = fingerprint::fingerprint(&message.cccc, &awips_id, issued_at, text);

    let event = WeatherEvent {
        event_id: Uuid::new_v4(),
        product_id: format!("{}-{}-{}", message.cccc, awips_id, issued_at.timestamp()),
        wmo: parsed_header.wmo,
        awips_id,
        cccc: message.cccc,
        product_category,
        issued_at,
        received_at: message.received_at,
        text: text.to_string(),
        segments,
        fingerprint: fp,
    };

    Ok((event, diagnostics))
}

/// Split product text on `$$` segment terminators. A product with no
/// terminator at all is treated as a single segment.
fn split_segments(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim() == "$$" {
            if !current.is_empty() {
                chunks.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        chunks.push(current.join("\n"));
    }
    chunks
}

fn parse_segment(
    chunk: &str,
    reference: DateTime<Utc>,
    geo: &GeoLookup,
    diagnostics: &mut ParseDiagnostics,
) -> Result<Option<Segment>, ParseError> {
    let Some(ugc_line) = chunk.lines().find(|l| looks_like_ugc_line(l)) else {
        diagnostics.note("segment chunk has no UGC line, skipping");
        return Ok(None);
    };
    let parsed_ugc = ugc::parse_ugc_line(ugc_line, reference)?;

    let mut vtec_list = Vec::new();
    let mut h_vtec = None;
    for line in chunk.lines() {
        let trimmed = line.trim();
        if trimmed.len() > 2 && trimmed.starts_with('/') && trimmed.ends_with('/') {
            if let Ok(v) = vtec::parse_p_vtec(trimmed) {
                vtec_list.push(v);
            } else if let Ok(h) = vtec::parse_h_vtec(trimmed) {
                h_vtec = Some(h);
            } else {
                diagnostics.note(format!("unrecognized VTEC-shaped line: {trimmed}"));
            }
        }
    }

    let headlines = body::extract_headlines(chunk);
    let ibw_tags = body::extract_ibw_tags(chunk);
    let polygon = body::extract_polygon(chunk);
    let time_mot_loc = body::extract_time_mot_loc(chunk, reference);

    let geo = parsed_ugc
        .codes
        .iter()
        .filter_map(|code| geo.resolve(code).cloned())
        .collect();

    Ok(Some(Segment {
        ugc_codes: parsed_ugc.codes,
        ugc_expires_at: parsed_ugc.expires_at,
        vtec: vtec_list,
        h_vtec,
        headlines,
        polygon,
        time_mot_loc,
        ibw_tags,
        geo,
    }))
}

fn looks_like_ugc_line(line: &str) -> bool {
    let trimmed = line.trim();
    if !trimmed.ends_with('-') || trimmed.len() < 8 {
        return false;
    }
    let body = trimmed.trim_end_matches('-');
    let parts: Vec<&str> = body.split('-').collect();
    match parts.last() {
        Some(last) => last.len() == 6 && last.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WireMessage;

    const TOR_TOP: &str = "WFUS53 KTOP 151830\nTORTOP\n\n...TORNADO EMERGENCY FOR TOPEKA...\nTORNADO DAMAGE THREAT...CATASTROPHIC\nKSC023-KSC177-151915-\n/O.NEW.KTOP.TO.W.0042.240115T1830Z-240115T1915Z/\nLAT...LON 3963 9657 3924 9650 3920 9630\nTIME...MOT...LOC 1830Z 277DEG 45KT 3963 9657\n$$\n";

    fn wire(text: &str) -> WireMessage {
        WireMessage {
            id: "1".to_string(),
            subject: None,
            body_text: text.to_string(),
            awips_id: Some("TORTOP".to_string()),
            cccc: "KTOP".to_string(),
            ttaaii: "WFUS53".to_string(),
            issued_at: DateTime::parse_from_rfc3339("2024-01-15T18:30:00Z")
                .unwrap()
                .with_timezone(&Utc),
            received_at: DateTime::parse_from_rfc3339("2024-01-15T18:30:05Z")
                .unwrap()
                .with_timezone(&Utc),
            room_jid: "nwws@conference.nwws-oi.weather.gov".to_string(),
        }
    }

    #[test]
    fn parses_tornado_emergency_end_to_end() {
        let geo = GeoLookup::bundled();
        let (event, diagnostics) = parse(wire(TOR_TOP), &geo).unwrap();
        assert_eq!(event.cccc, "KTOP");
        assert_eq!(event.awips_id, "TORTOP");
        assert_eq!(event.segments.len(), 1);
        let segment = &event.segments[0];
        assert_eq!(segment.ugc_codes.len(), 2);
        assert_eq!(segment.vtec.len(), 1);
        assert!(segment.polygon.is_some());
        assert!(segment.time_mot_loc.is_some());
        assert_eq!(
            segment.ibw_tags.get("TORNADO_DAMAGE_THREAT").unwrap(),
            "CATASTROPHIC"
        );
        assert_eq!(segment.geo.len(), 2);
        assert!(diagnostics.soft_issues.is_empty());
    }

    #[test]
    fn missing_h_vtec_for_flood_phenomenon_is_a_soft_issue() {
        let text = "WGUS53 KTOP 151830\nFLWTOP\n\nARKC2-151915-\n/O.NEW.KTOP.FL.W.0005.240115T1830Z-240115T2000Z/\n$$\n";
        let geo = GeoLookup::bundled();
        let (event, diagnostics) = parse(wire(text), &geo).unwrap();
        assert_eq!(event.segments[0].h_vtec, None);
        assert!(diagnostics
            .soft_issues
            .iter()
            .any(|s| s.contains("requires an H-VTEC")));
    }

    #[test]
    fn product_with_no_ugc_line_anywhere_is_structural_error() {
        let text = "ADMN01 KWNO 151830\nADMNWNO\n\njust some administrative text\n";
        let geo = GeoLookup::bundled();
        let err = parse(wire(text), &geo).unwrap_err();
        assert!(matches!(err, ParseError::Structural(_)));
    }
}
