//! Body decoding: headlines, IBW coded tags, the `LAT...LON` polygon
//! block, and `TIME...MOT...LOC`.

use chrono::{DateTime, Datelike, TimeZone, Utc};

use crate::model::{LatLon, TimeMotLoc};

/// Extract headline text between `...` ellipses, e.g.
/// `...TORNADO EMERGENCY FOR TOPEKA...`.
pub fn extract_headlines(text: &str) -> Vec<String> {
    let mut headlines = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("...") {
            if let Some(inner) = rest.strip_suffix("...") {
                if !inner.is_empty() {
                    headlines.push(inner.to_string());
                }
            }
        }
    }
    headlines
}

/// Extract uppercase `KEY...VALUE` IBW coded tag lines, e.g.
/// `TORNADO DAMAGE THREAT...CATASTROPHIC`. Keys are normalized to
/// `SCREAMING_SNAKE_CASE`.
pub fn extract_ibw_tags(text: &str) -> std::collections::BTreeMap<String, String> {
    let mut tags = std::collections::BTreeMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.starts_with("...") {
            // that's a headline, not a coded tag
            continue;
        }
        if let Some((key, value)) = line.split_once("...") {
            let key = key.trim();
            let value = value.trim();
            if key.is_empty()
                || value.is_empty()
                || !key.chars().all(|c| c.is_ascii_uppercase() || c == ' ')
            {
                continue;
            }
            let normalized_key = key.replace(' ', "_");
            tags.insert(normalized_key, value.to_string());
        }
    }
    tags
}

/// Parse a `LAT...LON` polygon block: the header literal, then
/// whitespace-separated decimal pairs (lat, then lon) until a blank line
/// or the next block terminator.
///
/// Coordinates in NWS text are unsigned; west longitudes are implied.
/// This parser stores them signed, west-negative (see DESIGN.md §Open
/// Questions for the rationale).
pub fn extract_polygon(text: &str) -> Option<Vec<LatLon>> {
    let mut lines = text.lines();
    let header_idx = text
        .lines()
        .position(|l| l.trim_start().starts_with("LAT...LON"))?;
    for _ in 0..=header_idx {
        lines.next();
    }

    let mut numbers = Vec::new();
    let first_line = text.lines().nth(header_idx).unwrap();
    let after_header = first_line.trim_start().trim_start_matches("LAT...LON").trim();
    numbers.extend(after_header.split_whitespace().filter_map(parse_coord));

    for line in lines {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("$$") || trimmed.starts_with("&&") {
            break;
        }
        if trimmed.split_whitespace().any(|tok| tok.parse::<f64>().is_err()) {
            break;
        }
        numbers.extend(trimmed.split_whitespace().filter_map(parse_coord));
    }

    if numbers.len() < 6 || numbers.len() % 2 != 0 {
        return None;
    }

    let points: Vec<LatLon> = numbers
        .chunks(2)
        .map(|pair| LatLon {
            lat: round2(pair[0] / 100.0),
            lon: round2(-(pair[1] / 100.0).abs()),
        })
        .collect();

    if !(3..=20).contains(&points.len()) {
        return None;
    }

    Some(points)
}

fn parse_coord(tok: &str) -> Option<f64> {
    tok.parse::<f64>().ok()
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Parse a `TIME...MOT...LOC` line, e.g.
/// `TIME...MOT...LOC 1830Z 277DEG 45KT 3963 9657`.
pub fn extract_time_mot_loc(text: &str, reference: DateTime<Utc>) -> Option<TimeMotLoc> {
    let line = text
        .lines()
        .find(|l| l.trim_start().starts_with("TIME...MOT...LOC"))?;
    let rest = line.trim_start().trim_start_matches("TIME...MOT...LOC").trim();
    let mut tokens = rest.split_whitespace();

    let time_tok = tokens.next()?;
    let hhmm = time_tok.trim_end_matches('Z');
    if hhmm.len() != 4 {
        return None;
    }
    let hour: u32 = hhmm[0..2].parse().ok()?;
    let minute: u32 = hhmm[2..4].parse().ok()?;
    let time = Utc
        .with_ymd_and_hms(reference.year(), reference.month(), reference.day(), hour, minute, 0)
        .single()?;

    let dir_tok = tokens.next()?.trim_end_matches("DEG");
    let direction_deg: u16 = dir_tok.parse().ok()?;

    let speed_tok = tokens.next()?.trim_end_matches("KT");
    let speed_kt: u16 = speed_tok.parse().ok()?;

    let remaining: Vec<&str> = tokens.collect();
    if remaining.is_empty() || remaining.len() % 2 != 0 {
        return None;
    }
    let locations: Vec<LatLon> = remaining
        .chunks(2)
        .filter_map(|pair| {
            let lat_scaled: f64 = pair[0].parse().ok()?;
            let lon_scaled: f64 = pair[1].parse().ok()?;
            Some(LatLon {
                lat: round2(lat_scaled / 100.0),
                lon: round2(-(lon_scaled / 100.0).abs()),
            })
        })
        .collect();

    if locations.is_empty() {
        return None;
    }

    Some(TimeMotLoc {
        time,
        direction_deg,
        speed_kt,
        locations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-01-15T18:30:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn extracts_a_headline() {
        let text = "...TORNADO EMERGENCY FOR TOPEKA...\nmore text";
        let headlines = extract_headlines(text);
        assert_eq!(headlines, vec!["TORNADO EMERGENCY FOR TOPEKA".to_string()]);
    }

    #[test]
    fn extracts_ibw_tags() {
        let text = "TORNADO...OBSERVED\nTORNADO DAMAGE THREAT...CATASTROPHIC\nMAX HAIL SIZE...2.75 IN\n";
        let tags = extract_ibw_tags(text);
        assert_eq!(tags.get("TORNADO").unwrap(), "OBSERVED");
        assert_eq!(
            tags.get("TORNADO_DAMAGE_THREAT").unwrap(),
            "CATASTROPHIC"
        );
        assert_eq!(tags.get("MAX_HAIL_SIZE").unwrap(), "2.75 IN");
    }

    #[test]
    fn parses_polygon_block() {
        let text = "LAT...LON 3963 9657 3924 9650 3920 9630\n\nTIME...MOT...LOC 1830Z 277DEG 45KT 3963 9657";
        let polygon = extract_polygon(text).unwrap();
        assert_eq!(polygon.len(), 3);
        assert!(polygon[0].lon < 0.0, "longitude should be stored negative");
        assert!((polygon[0].lat - 39.63).abs() < 0.001);
    }

    #[test]
    fn polygon_requires_at_least_three_points() {
        let text = "LAT...LON 3963 9657";
        assert!(extract_polygon(text).is_none());
    }

    #[test]
    fn parses_time_mot_loc() {
        let text = "TIME...MOT...LOC 1830Z 277DEG 45KT 3963 9657";
        let tml = extract_time_mot_loc(text, reference()).unwrap();
        assert_eq!(tml.direction_deg, 277);
        assert_eq!(tml.speed_kt, 45);
        assert_eq!(tml.locations.len(), 1);
    }
}
