//! HRD command grammar.
//!
//! Commands are ASCII-like, case-insensitive, whitespace-separated token
//! lines. A client may prefix a command with a `[N] ` radio selector,
//! which is stripped before parsing. Parsing never fails: anything the
//! grammar does not recognize becomes [`HrdCommand::Unknown`], which the
//! server answers with `RPRT -1`.

use slicehub_core::RadioMode;

/// One parsed HRD command.
#[derive(Debug, Clone, PartialEq)]
pub enum HrdCommand {
    /// `get frequency` / `get frequency-hz`
    GetFrequency,
    /// `set frequency-hz <Hz>`
    SetFrequencyHz(u64),
    /// `get mode`
    GetMode,
    /// `set dropdown Mode <MODE> <index>`
    SetMode(RadioMode),
    /// `get button-select {TX}` / `get button-select {PTT}`
    GetPtt,
    /// `set button-select {TX} <0|1>`
    SetPtt(bool),
    /// `get radio`
    GetRadio,
    /// `get radios`
    GetRadios,
    /// `get context`
    GetContext,
    /// `get contexts`
    GetContexts,
    /// Anything else.
    Unknown(String),
}

/// Strip an optional `[N] ` radio-selector prefix.
fn strip_selector(line: &str) -> &str {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix('[') {
        if let Some(close) = rest.find(']') {
            if rest[..close].chars().all(|c| c.is_ascii_digit()) {
                return rest[close + 1..].trim_start();
            }
        }
    }
    line
}

/// Parse one command line.
pub fn parse_command(line: &str) -> HrdCommand {
    let stripped = strip_selector(line);
    let tokens: Vec<String> = stripped
        .split_whitespace()
        .map(|t| t.to_lowercase())
        .collect();
    let tokens_ref: Vec<&str> = tokens.iter().map(String::as_str).collect();

    match tokens_ref.as_slice() {
        ["get", "frequency"] | ["get", "frequency-hz"] => HrdCommand::GetFrequency,
        ["set", "frequency-hz", hz] => match hz.parse() {
            Ok(hz) => HrdCommand::SetFrequencyHz(hz),
            Err(_) => HrdCommand::Unknown(stripped.to_string()),
        },
        ["get", "mode"] => HrdCommand::GetMode,
        ["set", "dropdown", "mode", mode, _index] => match mode.parse() {
            Ok(mode) => HrdCommand::SetMode(mode),
            Err(_) => HrdCommand::Unknown(stripped.to_string()),
        },
        ["get", "button-select", sel] if is_tx_selector(sel) => HrdCommand::GetPtt,
        ["set", "button-select", sel, value] if is_tx_selector(sel) => match *value {
            "0" => HrdCommand::SetPtt(false),
            "1" => HrdCommand::SetPtt(true),
            _ => HrdCommand::Unknown(stripped.to_string()),
        },
        ["get", "radio"] => HrdCommand::GetRadio,
        ["get", "radios"] => HrdCommand::GetRadios,
        ["get", "context"] => HrdCommand::GetContext,
        ["get", "contexts"] => HrdCommand::GetContexts,
        _ => HrdCommand::Unknown(stripped.to_string()),
    }
}

fn is_tx_selector(token: &str) -> bool {
    matches!(token, "{tx}" | "{ptt}" | "tx" | "ptt")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_frequency_variants() {
        assert_eq!(parse_command("get frequency"), HrdCommand::GetFrequency);
        assert_eq!(parse_command("get frequency-hz"), HrdCommand::GetFrequency);
        assert_eq!(parse_command("GET Frequency"), HrdCommand::GetFrequency);
    }

    #[test]
    fn set_frequency() {
        assert_eq!(
            parse_command("set frequency-hz 14074000"),
            HrdCommand::SetFrequencyHz(14_074_000)
        );
        assert!(matches!(
            parse_command("set frequency-hz banana"),
            HrdCommand::Unknown(_)
        ));
    }

    #[test]
    fn selector_prefix_is_stripped() {
        assert_eq!(parse_command("[1] get frequency"), HrdCommand::GetFrequency);
        assert_eq!(
            parse_command("[12] set frequency-hz 7074000"),
            HrdCommand::SetFrequencyHz(7_074_000)
        );
    }

    #[test]
    fn mode_commands() {
        assert_eq!(parse_command("get mode"), HrdCommand::GetMode);
        assert_eq!(
            parse_command("set dropdown Mode DIGU 5"),
            HrdCommand::SetMode(RadioMode::DIGU)
        );
        assert!(matches!(
            parse_command("set dropdown Mode WUMBO 5"),
            HrdCommand::Unknown(_)
        ));
    }

    #[test]
    fn ptt_commands() {
        assert_eq!(parse_command("get button-select {TX}"), HrdCommand::GetPtt);
        assert_eq!(parse_command("get button-select {PTT}"), HrdCommand::GetPtt);
        assert_eq!(
            parse_command("set button-select {TX} 1"),
            HrdCommand::SetPtt(true)
        );
        assert_eq!(
            parse_command("set button-select {TX} 0"),
            HrdCommand::SetPtt(false)
        );
    }

    #[test]
    fn identity_commands() {
        assert_eq!(parse_command("get radio"), HrdCommand::GetRadio);
        assert_eq!(parse_command("get radios"), HrdCommand::GetRadios);
        assert_eq!(parse_command("get context"), HrdCommand::GetContext);
        assert_eq!(parse_command("get contexts"), HrdCommand::GetContexts);
    }

    #[test]
    fn unknown_command() {
        assert!(matches!(
            parse_command("do the thing"),
            HrdCommand::Unknown(_)
        ));
        assert!(matches!(parse_command(""), HrdCommand::Unknown(_)));
    }
}
