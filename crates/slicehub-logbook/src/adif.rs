//! ADIF 3.1.0 record formatting and parsing.
//!
//! Fields are `<TAG:length>value` with an optional type specifier in the
//! tag, records end with `<EOR>`, and the header block ends with `<EOH>`.
//! Parsing is byte-oriented so field values may contain `<` without
//! confusing the scanner.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};

use slicehub_core::types::{QsoRecord, StationProfile};

/// ADIF version written in new file headers.
pub const ADIF_VERSION: &str = "3.1.0";

/// File header block for a fresh logbook.
pub fn file_header() -> String {
    format!(
        "slicehub amateur radio log\n<ADIF_VER:{}>{}\n<PROGRAMID:8>slicehub\n<EOH>\n",
        ADIF_VERSION.len(),
        ADIF_VERSION
    )
}

fn field(tag: &str, value: &str) -> String {
    format!("<{}:{}>{}", tag, value.len(), value)
}

/// Format one QSO as an ADIF record line, `<EOR>`-terminated.
pub fn format_record(qso: &QsoRecord, station: &StationProfile) -> String {
    let mut fields = vec![
        field("CALL", &qso.callsign),
        field("QSO_DATE", &qso.end.format("%Y%m%d").to_string()),
        field("TIME_ON", &qso.start.format("%H%M%S").to_string()),
        field("TIME_OFF", &qso.end.format("%H%M%S").to_string()),
        field("BAND", &qso.band),
        field("FREQ", &format!("{:.6}", qso.dial_hz as f64 / 1_000_000.0)),
        field("MODE", &qso.mode),
    ];
    if !qso.report_sent.is_empty() {
        fields.push(field("RST_SENT", &qso.report_sent));
    }
    if !qso.report_received.is_empty() {
        fields.push(field("RST_RCVD", &qso.report_received));
    }
    if let Some(grid) = &qso.grid {
        fields.push(field("GRIDSQUARE", grid));
    }
    if let Some(power) = qso.tx_power_watts {
        fields.push(field("TX_PWR", &format!("{power}")));
    }
    if let Some(notes) = &qso.notes {
        fields.push(field("COMMENT", notes));
    }
    if !station.grid.is_empty() {
        fields.push(field("MY_GRIDSQUARE", &station.grid));
    }
    if !station.callsign.is_empty() {
        fields.push(field("STATION_CALLSIGN", &station.callsign));
    }
    format!("{}<EOR>\n", fields.join(" "))
}

/// One parsed record: uppercase tag -> value.
pub type AdifFields = HashMap<String, String>;

/// Parse the data region of an ADIF document into records.
///
/// The header (everything before `<EOH>`) is skipped; records without a
/// CALL field are dropped.
pub fn parse_records(content: &str) -> Vec<AdifFields> {
    let upper = content.to_uppercase();
    let body_start = upper.find("<EOH>").map(|p| p + 5).unwrap_or(0);
    let body = &content[body_start..];
    let body_upper = &upper[body_start..];

    let mut records = Vec::new();
    let mut pos = 0;
    while let Some(offset) = body_upper[pos..].find("<EOR>") {
        let end = pos + offset;
        let fields = parse_fields(&body[pos..end]);
        if fields.contains_key("CALL") {
            records.push(fields);
        }
        pos = end + 5;
    }
    records
}

/// Scan `<TAG:len>value` fields out of one record's text.
fn parse_fields(text: &str) -> AdifFields {
    let bytes = text.as_bytes();
    let mut fields = AdifFields::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let Some(open) = bytes[pos..].iter().position(|&b| b == b'<') else {
            break;
        };
        pos += open + 1;

        let Some(close) = bytes[pos..].iter().position(|&b| b == b'>') else {
            break;
        };
        let tag_spec = &text[pos..pos + close];
        pos += close + 1;

        // TAG:LENGTH or TAG:LENGTH:TYPE; a bare TAG (like EOH) has no data.
        let mut parts = tag_spec.splitn(3, ':');
        let tag = parts.next().unwrap_or("").to_uppercase();
        let Some(len) = parts.next().and_then(|l| l.parse::<usize>().ok()) else {
            continue;
        };
        if pos + len > bytes.len() {
            break;
        }
        fields.insert(tag, text[pos..pos + len].to_string());
        pos += len;
    }
    fields
}

/// Worked-index key: `UPPER(call):lower(band):UPPER(mode)`.
pub fn worked_key(call: &str, band: &str, mode: &str) -> String {
    format!(
        "{}:{}:{}",
        call.to_uppercase(),
        band.to_lowercase(),
        mode.to_uppercase()
    )
}

/// Worked-index timestamp from a record's date and time fields.
///
/// Prefers TIME_OFF, falls back to TIME_ON, then midnight.
pub fn record_timestamp(fields: &AdifFields) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(fields.get("QSO_DATE")?, "%Y%m%d").ok()?;
    let time = fields
        .get("TIME_OFF")
        .or_else(|| fields.get("TIME_ON"))
        .and_then(|t| {
            NaiveTime::parse_from_str(t, "%H%M%S")
                .or_else(|_| NaiveTime::parse_from_str(t, "%H%M"))
                .ok()
        })
        .unwrap_or_else(|| NaiveTime::from_hms_opt(0, 0, 0).unwrap());
    Some(Utc.from_utc_datetime(&date.and_time(time)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use slicehub_core::types::Continent;

    fn station() -> StationProfile {
        StationProfile {
            callsign: "HB9BLA".into(),
            grid: "JN37VL".into(),
            continent: Continent::EU,
            dxcc: "HB9".into(),
            prefixes: vec![],
        }
    }

    fn qso() -> QsoRecord {
        let end = Utc.with_ymd_and_hms(2025, 6, 15, 13, 46, 30).unwrap();
        QsoRecord {
            start: end - chrono::Duration::seconds(90),
            end,
            callsign: "EA4IFI".into(),
            grid: Some("IM79".into()),
            band: "20m".into(),
            dial_hz: 14_074_000,
            mode: "FT8".into(),
            report_sent: "-07".into(),
            report_received: "+03".into(),
            tx_power_watts: Some(25.0),
            slice: 'B',
            channel: 1,
            instance: "Slice-B".into(),
            notes: None,
        }
    }

    #[test]
    fn record_has_expected_fields() {
        let line = format_record(&qso(), &station());
        assert!(line.ends_with("<EOR>\n"));
        assert!(!line.contains('\r'));
        assert!(line.contains("<CALL:6>EA4IFI"));
        assert!(line.contains("<QSO_DATE:8>20250615"));
        assert!(line.contains("<TIME_ON:6>134500"));
        assert!(line.contains("<TIME_OFF:6>134630"));
        assert!(line.contains("<BAND:3>20m"));
        assert!(line.contains("<FREQ:9>14.074000"));
        assert!(line.contains("<MODE:3>FT8"));
        assert!(line.contains("<RST_SENT:3>-07"));
        assert!(line.contains("<RST_RCVD:3>+03"));
        assert!(line.contains("<GRIDSQUARE:4>IM79"));
        assert!(line.contains("<TX_PWR:2>25"));
        assert!(line.contains("<MY_GRIDSQUARE:6>JN37VL"));
        assert!(line.contains("<STATION_CALLSIGN:6>HB9BLA"));
    }

    #[test]
    fn record_round_trips_worked_key() {
        let content = format!("{}{}", file_header(), format_record(&qso(), &station()));
        let records = parse_records(&content);
        assert_eq!(records.len(), 1);

        let r = &records[0];
        assert_eq!(
            worked_key(
                r.get("CALL").unwrap(),
                r.get("BAND").unwrap(),
                r.get("MODE").unwrap()
            ),
            "EA4IFI:20m:FT8"
        );
        let ts = record_timestamp(r).unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2025, 6, 15, 13, 46, 30).unwrap());
    }

    #[test]
    fn records_without_call_are_skipped() {
        let content = format!(
            "{}<MODE:3>FT8 <BAND:3>20m<EOR>\n{}",
            file_header(),
            format_record(&qso(), &station())
        );
        let records = parse_records(&content);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("CALL").unwrap(), "EA4IFI");
    }

    #[test]
    fn header_is_not_parsed_as_record() {
        let records = parse_records(&file_header());
        assert!(records.is_empty());
    }

    #[test]
    fn value_with_angle_bracket() {
        let content = "<EOH>\n<CALL:5>W1ABC <COMMENT:3>a<b<EOR>\n";
        let records = parse_records(content);
        assert_eq!(records[0].get("COMMENT").unwrap(), "a<b");
    }

    #[test]
    fn type_specifier_tolerated() {
        let content = "<EOH>\n<CALL:5:S>W1ABC <BAND:3>20m <MODE:3>FT8<EOR>\n";
        let records = parse_records(content);
        assert_eq!(records[0].get("CALL").unwrap(), "W1ABC");
    }

    #[test]
    fn worked_key_normalization() {
        assert_eq!(worked_key("ea4ifi", "20M", "ft8"), "EA4IFI:20m:FT8");
    }

    #[test]
    fn timestamp_falls_back_to_time_on() {
        let mut fields = AdifFields::new();
        fields.insert("QSO_DATE".into(), "20250615".into());
        fields.insert("TIME_ON".into(), "1015".into());
        let ts = record_timestamp(&fields).unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2025, 6, 15, 10, 15, 0).unwrap());
    }
}
