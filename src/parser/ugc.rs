//! UGC (Universal Geographic Code) line parsing and expansion:
//! `SSFNNN[>NNN][-...]-DDHHMM-`.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};

use crate::error::ParseError;
use crate::model::UgcKind;

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedUgc {
    pub codes: BTreeSet<String>,
    pub expires_at: DateTime<Utc>,
}

/// Parse one UGC line and expand any `>`-compressed ranges.
///
/// `reference` supplies the month/year context for the trailing
/// `DDHHMM-` expiration stamp, same convention as the WMO heading.
pub fn parse_ugc_line(line: &str, reference: DateTime<Utc>) -> Result<ParsedUgc, ParseError> {
    let line = line.trim().trim_end_matches('-');
    let mut parts: Vec<&str> = line.split('-').collect();

    let ddhhmm = parts
        .pop()
        .ok_or_else(|| ParseError::MalformedUgc(line.to_string()))?;
    if ddhhmm.len() != 6 || !ddhhmm.chars().all(|c| c.is_ascii_digit()) {
        return Err(ParseError::MalformedUgc(line.to_string()));
    }

    let mut codes = BTreeSet::new();
    let mut state_fips: Option<(String, char)> = None;

    for token in parts.drain(..) {
        if let Some((range_start, range_end)) = token.split_once('>') {
            // e.g. "COC001>005" means state+type carries over, numbers expand
            let (state, kind, start_num) = split_code(range_start)?;
            let end_num: u32 = range_end
                .parse()
                .map_err(|_| ParseError::MalformedUgc(line.to_string()))?;
            let start_num: u32 = start_num
                .parse()
                .map_err(|_| ParseError::MalformedUgc(line.to_string()))?;
            if end_num < start_num {
                return Err(ParseError::MalformedUgc(line.to_string()));
            }
            for n in start_num..=end_num {
                codes.insert(format!("{state}{kind}{n:03}"));
            }
            state_fips = Some((state, kind));
        } else if token.len() == 3 && token.chars().all(|c| c.is_ascii_digit()) {
            // bare three-digit number: reuses the last seen state+type,
            // e.g. "COC001>005-013-" => "013" belongs to "COC"
            let (state, kind) = state_fips
                .clone()
                .ok_or_else(|| ParseError::MalformedUgc(line.to_string()))?;
            codes.insert(format!("{state}{kind}{token}"));
        } else {
            let (state, kind, num) = split_code(token)?;
            codes.insert(format!("{state}{kind}{num}"));
            state_fips = Some((state, kind));
        }
    }

    if codes.is_empty() {
        return Err(ParseError::MalformedUgc(line.to_string()));
    }

    // Invariant 1: a segment's UGC codes are all counties or
    // all zones, never mixed.
    let mut kinds = codes.iter().filter_map(|c| c.chars().nth(2));
    let first_kind = kinds.next();
    if kinds.any(|k| Some(k) != first_kind) {
        return Err(ParseError::MixedUgcPrefix);
    }

    let expires_at = resolve_expiry(ddhhmm, reference);

    Ok(ParsedUgc { codes, expires_at })
}

fn split_code(token: &str) -> Result<(String, char, String), ParseError> {
    if token.len() < 6 {
        return Err(ParseError::MalformedUgc(token.to_string()));
    }
    let state = &token[0..2];
    let kind = token.chars().nth(2).unwrap();
    if kind != 'C' && kind != 'Z' {
        return Err(ParseError::MalformedUgc(token.to_string()));
    }
    let num = &token[3..];
    if num.len() != 3 || !num.chars().all(|c| c.is_ascii_digit()) {
        return Err(ParseError::MalformedUgc(token.to_string()));
    }
    Ok((state.to_string(), kind, num.to_string()))
}

fn resolve_expiry(ddhhmm: &str, reference: DateTime<Utc>) -> DateTime<Utc> {
    let day: u32 = ddhhmm[0..2].parse().unwrap_or_else(|_| reference.day());
    let hour: u32 = ddhhmm[2..4].parse().unwrap_or_else(|_| reference.hour());
    let minute: u32 = ddhhmm[4..6].parse().unwrap_or(0);

    Utc.with_ymd_and_hms(reference.year(), reference.month(), day.max(1), hour, minute, 0)
        .single()
        .unwrap_or(reference)
}

pub fn ugc_kind_of(codes: &BTreeSet<String>) -> Option<UgcKind> {
    codes.iter().next().and_then(|c| {
        c.chars().nth(2).and_then(|ch| match ch {
            'C' => Some(UgcKind::County),
            'Z' => Some(UgcKind::Zone),
            _ => None,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ref_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-01-15T18:30:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn parses_single_code() {
        let parsed = parse_ugc_line("KSC023-151915-", ref_time()).unwrap();
        assert_eq!(parsed.codes.len(), 1);
        assert!(parsed.codes.contains("KSC023"));
    }

    #[test]
    fn expands_range_and_trailing_code() {
        // Colorado counties 001..005 and 013
        let parsed = parse_ugc_line("COC001>005-013-151915-", ref_time()).unwrap();
        assert_eq!(parsed.codes.len(), 6);
        assert!(parsed.codes.contains("COC001"));
        assert!(parsed.codes.contains("COC005"));
        assert!(parsed.codes.contains("COC013"));
    }

    #[test]
    fn rejects_mixed_county_and_zone() {
        let err = parse_ugc_line("KSC023-KSZ005-151915-", ref_time()).unwrap_err();
        assert!(matches!(err, ParseError::MixedUgcPrefix));
    }

    #[test]
    fn zone_form_parses() {
        let parsed = parse_ugc_line("COZ040-151915-", ref_time()).unwrap();
        assert_eq!(ugc_kind_of(&parsed.codes), Some(UgcKind::Zone));
    }
}
