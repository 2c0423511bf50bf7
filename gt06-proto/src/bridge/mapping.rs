//! Command-to-line and reply-classification mapping tables.

/// Case-insensitive substring mapping, first match wins, evaluated in
/// table order. Falls back to `CMD:<original text>` when nothing matches.
const TEXT_MAPPING: &[(&[&str], &str)] = &[
    (&["STOP", "CUT", "BLOQUEAR", "BLOCK", "KILL", "DYD"], "CMD:BLOQUEAR"),
    (&["RESUME", "RESTORE", "DESBLOQUEAR", "UNBLOCK", "START", "HFYD"], "CMD:DESBLOQUEAR"),
    (&["WHERE", "LOCATE", "POSICAO", "POSITION", "GPS"], "CMD:POSICAO"),
    (&["RESET", "REINICIAR", "REBOOT", "RESTART"], "CMD:REINICIAR"),
    (&["STATUS", "ESTADO", "INFO"], "CMD:STATUS"),
    (&["INTERVAL", "INTERVALO"], "CMD:INTERVALO"),
];

/// Maps a decoded textual 0x80 command body to the outbound serial line.
pub fn map_text_command(text: &str) -> String {
    let upper = text.to_ascii_uppercase();
    for (needles, line) in TEXT_MAPPING {
        if needles.iter().any(|needle| upper.contains(needle)) {
            return (*line).to_string();
        }
    }
    format!("CMD:{text}")
}

/// Maps the structured `output=N, state=S` pseudo-command used by the
/// OUTPUT 0x80 variant.
pub fn map_output_command(output: u8, state: u8) -> String {
    match (output, state) {
        (1, 1) => "ENGINE_STOP".to_string(),
        (1, 0) => "ENGINE_RESUME".to_string(),
        (n, s) => format!("CUSTOM,OUTPUT={n},STATE={s}"),
    }
}

/// Classification of a microcontroller reply line, keyed by prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Ack,
    Error,
    Status,
    Log,
    Other,
}

pub fn classify_reply(line: &str) -> ReplyKind {
    let upper = line.trim().to_ascii_uppercase();
    if upper.starts_with("ACK") {
        ReplyKind::Ack
    } else if upper.starts_with("ERROR") {
        ReplyKind::Error
    } else if upper.starts_with("STATUS") {
        ReplyKind::Status
    } else if upper.starts_with("LOG") {
        ReplyKind::Log
    } else {
        ReplyKind::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_family_maps_to_bloquear() {
        for text in ["stop", "CUT power", "please block now", "kill engine", "dyd"] {
            assert_eq!(map_text_command(text), "CMD:BLOQUEAR", "failed for {text}");
        }
    }

    #[test]
    fn resume_family_maps_to_desbloquear() {
        assert_eq!(map_text_command("please resume"), "CMD:DESBLOQUEAR");
        assert_eq!(map_text_command("UNBLOCK"), "CMD:DESBLOQUEAR");
    }

    #[test]
    fn unmatched_falls_back_to_raw_text() {
        assert_eq!(map_text_command("PING"), "CMD:PING");
    }

    #[test]
    fn first_match_wins_in_table_order() {
        // Contains both a STOP-family and a STATUS-family keyword; STOP
        // is earlier in the table and must win.
        assert_eq!(map_text_command("STOP AND REPORT STATUS"), "CMD:BLOQUEAR");
    }

    #[test]
    fn output_mapping_covers_engine_cases() {
        assert_eq!(map_output_command(1, 1), "ENGINE_STOP");
        assert_eq!(map_output_command(1, 0), "ENGINE_RESUME");
        assert_eq!(map_output_command(2, 1), "CUSTOM,OUTPUT=2,STATE=1");
    }

    #[test]
    fn reply_classification_by_prefix() {
        assert_eq!(classify_reply("ACK:done"), ReplyKind::Ack);
        assert_eq!(classify_reply("error: link down"), ReplyKind::Error);
        assert_eq!(classify_reply("STATUS ok"), ReplyKind::Status);
        assert_eq!(classify_reply("log: boot"), ReplyKind::Log);
        assert_eq!(classify_reply("hello"), ReplyKind::Other);
    }
}
