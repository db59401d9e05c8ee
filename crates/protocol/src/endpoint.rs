//! Endpoint announcement line.
//!
//! The host prints a single recognizable line once its channel endpoint is
//! bound; the launcher scans the host's output for it to learn where to
//! connect. Address selection itself is the launcher's business.

/// Prefix of the announcement line.
pub const ANNOUNCEMENT_PREFIX: &str = "tether host listening on ";

/// Formats the announcement line for a bound endpoint URL.
pub fn announcement_line(url: &str) -> String {
    format!("{ANNOUNCEMENT_PREFIX}{url}")
}

/// Extracts the endpoint URL from one line of host output, if present.
pub fn parse_announcement(line: &str) -> Option<&str> {
    let url = line.trim().strip_prefix(ANNOUNCEMENT_PREFIX)?.trim();
    (!url.is_empty()).then_some(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn announcement_round_trips() {
        let line = announcement_line("ws://127.0.0.1:9229");
        assert_eq!(parse_announcement(&line), Some("ws://127.0.0.1:9229"));
    }

    #[test]
    fn surrounding_whitespace_is_tolerated() {
        assert_eq!(
            parse_announcement("  tether host listening on ws://[::1]:40001 \n"),
            Some("ws://[::1]:40001")
        );
    }

    #[test]
    fn unrelated_lines_are_ignored() {
        assert_eq!(parse_announcement("starting up"), None);
        assert_eq!(parse_announcement("tether host listening on "), None);
    }
}
