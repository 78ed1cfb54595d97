//! Decode-text parsing and CQ targeting.
//!
//! Digital-mode decoders hand us free text like `"CQ NA W1ABC FN42"` or
//! `"HB9BLA EA4IFI R-07"`. This module extracts the caller's callsign and
//! grid, classifies CQ calls, and evaluates -- server-side, as the single
//! oracle -- whether a regionally-targeted CQ is directed at this station.

use crate::types::StationProfile;

/// Region keywords recognized after "CQ".
const CQ_REGION_TOKENS: &[&str] = &[
    "DX", "NA", "SA", "EU", "AS", "AF", "OC", "JA", "ASIA", "EUROPE", "AFRICA",
];

/// Result of parsing one decoded message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedMessage {
    /// The sending station's callsign, if one was found.
    pub callsign: Option<String>,
    /// The first grid locator following the callsign, if any.
    pub grid: Option<String>,
    /// Whether the message is a CQ call.
    pub is_cq: bool,
    /// Region token following "CQ" (e.g. "NA"), absent for a plain CQ.
    pub cq_target: Option<String>,
}

/// Returns `true` if `s` is a plausible amateur callsign: one to three
/// alphanumerics, a digit, one to four letters, and an optional `/suffix`.
pub fn is_valid_callsign(s: &str) -> bool {
    let (base, suffix) = match s.split_once('/') {
        Some((b, sfx)) => (b, Some(sfx)),
        None => (s, None),
    };
    if let Some(sfx) = suffix {
        if sfx.is_empty() || !sfx.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()) {
            return false;
        }
    }

    let chars: Vec<char> = base.chars().collect();
    // Try each prefix length; the digit separates prefix from suffix letters.
    for prefix_len in 1..=3usize.min(chars.len().saturating_sub(2)) {
        let (prefix, rest) = chars.split_at(prefix_len);
        if !prefix.iter().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()) {
            continue;
        }
        let Some((digit, letters)) = rest.split_first() else {
            continue;
        };
        if !digit.is_ascii_digit() {
            continue;
        }
        if (1..=4).contains(&letters.len()) && letters.iter().all(|c| c.is_ascii_uppercase()) {
            return true;
        }
    }
    false
}

/// Returns `true` if `s` is a Maidenhead locator: two field letters A-R,
/// two digits, and an optional lowercase subsquare pair.
///
/// "RR73" satisfies the pattern but is the end-of-contact token, never a
/// real locator, so it is excluded.
pub fn is_valid_grid(s: &str) -> bool {
    if s == "RR73" {
        return false;
    }
    let chars: Vec<char> = s.chars().collect();
    match chars.len() {
        4 | 6 => {}
        _ => return false,
    }
    let field_ok = chars[..2].iter().all(|c| ('A'..='R').contains(c));
    let square_ok = chars[2..4].iter().all(|c| c.is_ascii_digit());
    let sub_ok = chars.len() == 4 || chars[4..6].iter().all(|c| ('a'..='x').contains(c));
    field_ok && square_ok && sub_ok
}

/// Parse one decoded message into callsign, grid, and CQ classification.
pub fn parse_text(text: &str) -> ParsedMessage {
    let upper = text.trim().to_uppercase();
    let tokens: Vec<&str> = upper.split_whitespace().collect();
    if tokens.is_empty() {
        return ParsedMessage::default();
    }

    let is_cq = tokens[0] == "CQ";
    let cq_target = if is_cq {
        tokens
            .get(1)
            .filter(|t| CQ_REGION_TOKENS.contains(&t.to_uppercase().as_str()))
            .map(|t| t.to_string())
    } else {
        None
    };

    // Locate the caller. For a CQ the callsign is the second token, or the
    // third when a short region token sits in between. Otherwise messages
    // read "<their-call> <my-call> ...", so the caller is the first or
    // second token.
    let (callsign, call_pos) = if is_cq {
        match tokens.get(1) {
            Some(t) if is_valid_callsign(t) => (Some(t.to_string()), 1),
            Some(t) if t.len() <= 3 => match tokens.get(2) {
                Some(t2) if is_valid_callsign(t2) => (Some(t2.to_string()), 2),
                _ => (None, 0),
            },
            _ => (None, 0),
        }
    } else {
        match tokens.first() {
            Some(t) if is_valid_callsign(t) => (Some(t.to_string()), 0),
            _ => match tokens.get(1) {
                Some(t) if is_valid_callsign(t) => (Some(t.to_string()), 1),
                _ => (None, 0),
            },
        }
    };

    let grid = callsign.as_ref().and_then(|_| {
        tokens[call_pos + 1..]
            .iter()
            .find(|t| is_valid_grid(t))
            .map(|t| t.to_string())
    });

    ParsedMessage {
        callsign,
        grid,
        is_cq,
        cq_target,
    }
}

/// Authoritative directed-CQ evaluation.
///
/// Clients never recompute this; the verdict travels with every decode
/// record the hub hands out.
pub fn is_directed_cq_to_me(cq_target: Option<&str>, profile: &StationProfile) -> bool {
    let Some(target) = cq_target else {
        // Plain CQ: anyone may answer.
        return true;
    };
    let my_continent = profile.continent.as_str();
    match target {
        "DX" => true,
        "NA" | "SA" | "EU" | "AS" | "AF" | "OC" => target == my_continent,
        "EUROPE" => my_continent == "EU",
        "ASIA" => my_continent == "AS",
        "AFRICA" => my_continent == "AF",
        "JA" => {
            let dxcc = profile.dxcc.to_uppercase();
            dxcc.starts_with("JA") || dxcc.starts_with("JR") || dxcc.starts_with("7J")
        }
        _ => false,
    }
}

/// Whether the message appears to be addressed to `my_call`: the call is
/// the first or second whitespace token.
pub fn is_my_call(text: &str, my_call: &str) -> bool {
    let my_call = my_call.to_uppercase();
    text.to_uppercase()
        .split_whitespace()
        .take(2)
        .any(|t| t == my_call)
}
