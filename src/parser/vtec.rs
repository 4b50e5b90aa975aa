//! P-VTEC and H-VTEC decoding.

use chrono::{DateTime, TimeZone, Utc};

use crate::error::ParseError;
use crate::model::{
    HVtec, HVtecSeverity, RecordStatus, Vtec, VtecAction, VtecProductStatus, VtecSignificance,
};

/// Parse a single P-VTEC string, e.g.
/// `/O.NEW.KTOP.TO.W.0042.240115T1830Z-240115T1915Z/`.
pub fn parse_p_vtec(raw: &str) -> Result<Vtec, ParseError> {
    let body = raw
        .trim()
        .strip_prefix('/')
        .and_then(|s| s.strip_suffix('/'))
        .ok_or_else(|| ParseError::MalformedVtec(raw.to_string()))?;

    let fields: Vec<&str> = body.split('.').collect();
    if fields.len() != 7 {
        return Err(ParseError::MalformedVtec(raw.to_string()));
    }

    let fixed = parse_product_status(fields[0], raw)?;
    let action = parse_action(fields[1], raw)?;
    let office = fields[2].to_string();
    if office.len() != 4 {
        return Err(ParseError::MalformedVtec(raw.to_string()));
    }
    let phenomenon = fields[3].to_string();
    if phenomenon.len() != 2 {
        return Err(ParseError::MalformedVtec(raw.to_string()));
    }
    let significance = parse_significance(fields[4], raw)?;
    let etn: u16 = fields[5]
        .parse()
        .map_err(|_| ParseError::MalformedVtec(raw.to_string()))?;
    if etn == 0 {
        return Err(ParseError::MalformedVtec(raw.to_string()));
    }

    let (begin_str, end_str) = fields[6]
        .split_once('-')
        .ok_or_else(|| ParseError::MalformedVtec(raw.to_string()))?;
    let begin = parse_vtec_time(begin_str, raw)?;
    let end = parse_vtec_time(end_str, raw)?;

    Ok(Vtec {
        fixed,
        action,
        office,
        phenomenon,
        significance,
        etn,
        begin,
        end,
    })
}

/// Parse a single H-VTEC string, e.g.
/// `/ARKC2.1.ER.240115T1200Z.240115T1500Z.240115T1800Z.NO/`.
pub fn parse_h_vtec(raw: &str) -> Result<HVtec, ParseError> {
    let body = raw
        .trim()
        .strip_prefix('/')
        .and_then(|s| s.strip_suffix('/'))
        .ok_or_else(|| ParseError::MalformedVtec(raw.to_string()))?;

    let fields: Vec<&str> = body.split('.').collect();
    if fields.len() != 7 {
        return Err(ParseError::MalformedVtec(raw.to_string()));
    }

    let nwsli = fields[0].to_string();
    let severity = match fields[1] {
        "N" => HVtecSeverity::None,
        "0" => HVtecSeverity::None,
        "1" => HVtecSeverity::Minor,
        "2" => HVtecSeverity::Moderate,
        "3" => HVtecSeverity::Major,
        "U" => HVtecSeverity::Unknown,
        _ => return Err(ParseError::MalformedVtec(raw.to_string())),
    };
    let immediate_cause = fields[2].to_string();
    if immediate_cause.len() != 2 {
        return Err(ParseError::MalformedVtec(raw.to_string()));
    }
    let flood_begin = parse_vtec_time(fields[3], raw)?;
    let flood_crest = parse_vtec_time(fields[4], raw)?;
    let flood_end = parse_vtec_time(fields[5], raw)?;
    let record_status = match fields[6] {
        "OO" => RecordStatus::OldOld,
        "NO" => RecordStatus::NewOld,
        "NR" => RecordStatus::NewRecord,
        "UU" => RecordStatus::Unknown,
        _ => return Err(ParseError::MalformedVtec(raw.to_string())),
    };

    Ok(HVtec {
        nwsli,
        severity,
        immediate_cause,
        flood_begin,
        flood_crest,
        flood_end,
        record_status,
    })
}

/// Phenomena that require a paired H-VTEC.
pub fn requires_h_vtec(phenomenon: &str) -> bool {
    matches!(phenomenon, "FF" | "FA" | "FL" | "HY")
}

fn parse_product_status(s: &str, raw: &str) -> Result<VtecProductStatus, ParseError> {
    match s {
        "O" => Ok(VtecProductStatus::Operational),
        "T" => Ok(VtecProductStatus::Test),
        "E" => Ok(VtecProductStatus::Experimental),
        "X" => Ok(VtecProductStatus::ExperimentalInOperational),
        _ => Err(ParseError::MalformedVtec(raw.to_string())),
    }
}

fn parse_action(s: &str, raw: &str) -> Result<VtecAction, ParseError> {
    match s {
        "NEW" => Ok(VtecAction::New),
        "CON" => Ok(VtecAction::Con),
        "EXT" => Ok(VtecAction::Ext),
        "EXA" => Ok(VtecAction::Exa),
        "EXB" => Ok(VtecAction::Exb),
        "CAN" => Ok(VtecAction::Can),
        "UPG" => Ok(VtecAction::Upg),
        "EXP" => Ok(VtecAction::Exp),
        "ROU" => Ok(VtecAction::Rou),
        "COR" => Ok(VtecAction::Cor),
        _ => Err(ParseError::MalformedVtec(raw.to_string())),
    }
}

fn parse_significance(s: &str, raw: &str) -> Result<VtecSignificance, ParseError> {
    match s {
        "W" => Ok(VtecSignificance::Warning),
        "A" => Ok(VtecSignificance::Watch),
        "Y" => Ok(VtecSignificance::Advisory),
        "S" => Ok(VtecSignificance::Statement),
        "F" => Ok(VtecSignificance::Forecast),
        "O" => Ok(VtecSignificance::Outlook),
        "N" => Ok(VtecSignificance::Synopsis),
        _ => Err(ParseError::MalformedVtec(raw.to_string())),
    }
}

/// `yymmddThhnnZ`, or all zeros meaning "already begun" / "until further
/// notice" depending on position. Zeros
/// decode to `None`.
fn parse_vtec_time(s: &str, raw: &str) -> Result<Option<DateTime<Utc>>, ParseError> {
    if s == "000000T0000Z" {
        return Ok(None);
    }
    if s.len() != 13 {
        return Err(ParseError::MalformedVtec(raw.to_string()));
    }

    let yy: i32 = s[0..2]
        .parse()
        .map_err(|_| ParseError::MalformedVtec(raw.to_string()))?;
    let mm: u32 = s[2..4]
        .parse()
        .map_err(|_| ParseError::MalformedVtec(raw.to_string()))?;
    let dd: u32 = s[4..6]
        .parse()
        .map_err(|_| ParseError::MalformedVtec(raw.to_string()))?;
    if &s[6..7] != "T" || !s.ends_with('Z') {
        return Err(ParseError::MalformedVtec(raw.to_string()));
    }
    let hh: u32 = s[7..9]
        .parse()
        .map_err(|_| ParseError::MalformedVtec(raw.to_string()))?;
    let nn: u32 = s[9..11]
        .parse()
        .map_err(|_| ParseError::MalformedVtec(raw.to_string()))?;

    let year = 2000 + yy;
    Utc.with_ymd_and_hms(year, mm, dd, hh, nn, 0)
        .single()
        .map(Some)
        .ok_or_else(|| ParseError::MalformedVtec(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tornado_warning_vtec() {
        let v = parse_p_vtec("/O.NEW.KTOP.TO.W.0042.240115T1830Z-240115T1915Z/").unwrap();
        assert_eq!(v.fixed, VtecProductStatus::Operational);
        assert_eq!(v.action, VtecAction::New);
        assert_eq!(v.office, "KTOP");
        assert_eq!(v.phenomenon, "TO");
        assert_eq!(v.significance, VtecSignificance::Warning);
        assert_eq!(v.etn, 42);
        assert!(v.begin.is_some());
        assert!(v.end.is_some());
    }

    #[test]
    fn already_begun_is_none() {
        let v = parse_p_vtec("/O.CON.KBOU.FL.W.0005.000000T0000Z-240115T2000Z/").unwrap();
        assert!(v.begin.is_none());
        assert!(v.end.is_some());
    }

    #[test]
    fn parses_h_vtec() {
        let h = parse_h_vtec("/ARKC2.1.ER.240115T1200Z.240115T1500Z.240115T1800Z.NO/").unwrap();
        assert_eq!(h.nwsli, "ARKC2");
        assert_eq!(h.severity, HVtecSeverity::Minor);
        assert_eq!(h.immediate_cause, "ER");
        assert_eq!(h.record_status, RecordStatus::NewOld);
    }

    #[test]
    fn rejects_malformed_vtec() {
        assert!(parse_p_vtec("not vtec at all").is_err());
        assert!(parse_p_vtec("/O.NEW.KTOP.TO.W.0000.240115T1830Z-240115T1915Z/").is_err());
    }

    #[test]
    fn requires_h_vtec_flags_correct_phenomena() {
        assert!(requires_h_vtec("FF"));
        assert!(requires_h_vtec("FL"));
        assert!(!requires_h_vtec("TO"));
    }
}
