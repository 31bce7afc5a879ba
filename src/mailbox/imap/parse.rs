//! Parsing for the few IMAP responses the session reads.
//!
//! Pure string handling, no I/O.

use chrono::{DateTime, Utc};

use super::session::Untagged;

/// Attributes picked out of a `FETCH` response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchAttrs {
    pub uid: Option<u32>,
    pub internal_date: Option<DateTime<Utc>>,
    pub seen: bool,
}

/// Size of the literal announced at the end of a line (`... {123}`).
pub fn literal_len(line: &str) -> Option<usize> {
    let body = line.strip_suffix('}')?;
    let open = body.rfind('{')?;
    let digits = body[open + 1..].trim_end_matches('+');
    digits.parse().ok()
}

/// UIDs from `SEARCH` responses.
pub fn parse_search(responses: &[Untagged]) -> Vec<u32> {
    responses
        .iter()
        .filter_map(|r| r.text.strip_prefix("SEARCH"))
        .flat_map(|rest| rest.split_whitespace())
        .filter_map(|n| n.parse().ok())
        .collect()
}

/// Message count from an `N EXISTS` response.
pub fn parse_exists(text: &str) -> Option<u64> {
    let (count, kind) = text.trim().split_once(' ')?;
    if !kind.eq_ignore_ascii_case("EXISTS") {
        return None;
    }
    count.parse().ok()
}

/// Whether `text` is an `N EXPUNGE` response.
pub fn is_expunge(text: &str) -> bool {
    text.trim()
        .split_once(' ')
        .is_some_and(|(seq, kind)| seq.parse::<u32>().is_ok() && kind.eq_ignore_ascii_case("EXPUNGE"))
}

/// Attributes from `12 FETCH (UID 4827 FLAGS (\Seen) INTERNALDATE "..." ...)`.
///
/// Returns `None` for anything that is not a FETCH response.
pub fn parse_fetch(text: &str) -> Option<FetchAttrs> {
    let mut words = text.splitn(3, ' ');
    words.next()?.parse::<u32>().ok()?;
    if !words.next()?.eq_ignore_ascii_case("FETCH") {
        return None;
    }
    let attrs = words.next().unwrap_or_default();

    let uid = attrs.find("UID ").and_then(|pos| {
        attrs[pos + 4..]
            .split(|c: char| !c.is_ascii_digit())
            .next()
            .and_then(|n| n.parse().ok())
    });

    let internal_date = attrs.find("INTERNALDATE \"").and_then(|pos| {
        let start = pos + "INTERNALDATE \"".len();
        let end = attrs[start..].find('"')?;
        parse_internal_date(&attrs[start..start + end])
    });

    let seen = attrs
        .find("FLAGS (")
        .and_then(|pos| {
            let start = pos + "FLAGS (".len();
            let end = attrs[start..].find(')')?;
            Some(
                attrs[start..start + end]
                    .split_whitespace()
                    .any(|f| f.eq_ignore_ascii_case("\\Seen")),
            )
        })
        .unwrap_or(false);

    Some(FetchAttrs {
        uid,
        internal_date,
        seen,
    })
}

/// Parse an IMAP `date-time` such as `17-Jul-1996 02:44:25 -0700`.
pub fn parse_internal_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw.trim(), "%d-%b-%Y %H:%M:%S %z")
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Most recently received first; undated messages last, ties broken by higher UID.
pub fn sort_newest_first(attrs: &mut [FetchAttrs]) {
    attrs.sort_by(|a, b| {
        b.internal_date
            .cmp(&a.internal_date)
            .then_with(|| b.uid.cmp(&a.uid))
    });
}

/// Status code from an HTTP status line (`HTTP/1.1 200 Connection established`).
pub fn proxy_status(line: &str) -> Option<u16> {
    let mut parts = line.split_whitespace();
    if !parts.next()?.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn untagged(text: &str) -> Untagged {
        Untagged {
            text: text.to_string(),
            literals: Vec::new(),
        }
    }

    #[test]
    fn literal_len_detects_trailing_literal() {
        assert_eq!(literal_len("1 FETCH (UID 5 BODY[] {342}"), Some(342));
        assert_eq!(literal_len("1 FETCH (UID 5 BODY[] {12+}"), Some(12));
        assert_eq!(literal_len("1 FETCH (UID 5 FLAGS ())"), None);
        assert_eq!(literal_len("weird {abc}"), None);
    }

    #[test]
    fn search_collects_all_uids() {
        let responses = vec![
            untagged("SEARCH 4 9 12"),
            untagged("OK something else"),
            untagged("SEARCH 15"),
        ];
        assert_eq!(parse_search(&responses), vec![4, 9, 12, 15]);
    }

    #[test]
    fn search_with_no_matches() {
        assert!(parse_search(&[untagged("SEARCH")]).is_empty());
    }

    #[test]
    fn exists_count() {
        assert_eq!(parse_exists("231 EXISTS"), Some(231));
        assert_eq!(parse_exists("0 exists"), Some(0));
        assert_eq!(parse_exists("4 RECENT"), None);
        assert_eq!(parse_exists("SEARCH 1 2"), None);
    }

    #[test]
    fn expunge_detection() {
        assert!(is_expunge("7 EXPUNGE"));
        assert!(!is_expunge("7 EXISTS"));
        assert!(!is_expunge("OK EXPUNGE done"));
    }

    #[test]
    fn fetch_with_all_attrs() {
        let attrs = parse_fetch(
            "12 FETCH (UID 4827 FLAGS (\\Seen \\Flagged) INTERNALDATE \"17-Jul-1996 02:44:25 -0700\" BODY[] {310})",
        )
        .unwrap();
        assert_eq!(attrs.uid, Some(4827));
        assert!(attrs.seen);
        assert_eq!(
            attrs.internal_date,
            Some(Utc.with_ymd_and_hms(1996, 7, 17, 9, 44, 25).unwrap())
        );
    }

    #[test]
    fn fetch_unseen_message() {
        let attrs = parse_fetch("3 FETCH (UID 9 FLAGS ())").unwrap();
        assert_eq!(attrs.uid, Some(9));
        assert!(!attrs.seen);
        assert!(attrs.internal_date.is_none());
    }

    #[test]
    fn fetch_ignores_other_responses() {
        assert!(parse_fetch("3 EXISTS").is_none());
        assert!(parse_fetch("OK [UIDVALIDITY 1]").is_none());
    }

    #[test]
    fn internal_date_with_padded_day() {
        let date = parse_internal_date(" 5-Mar-2024 08:00:00 +0000").unwrap();
        assert_eq!(date, Utc.with_ymd_and_hms(2024, 3, 5, 8, 0, 0).unwrap());
    }

    #[test]
    fn sort_puts_newest_first() {
        let at = |h| Some(Utc.with_ymd_and_hms(2024, 1, 1, h, 0, 0).unwrap());
        let mut attrs = vec![
            FetchAttrs { uid: Some(1), internal_date: at(8), seen: false },
            FetchAttrs { uid: Some(2), internal_date: None, seen: false },
            FetchAttrs { uid: Some(3), internal_date: at(10), seen: false },
            FetchAttrs { uid: Some(4), internal_date: at(9), seen: false },
        ];
        sort_newest_first(&mut attrs);
        let order: Vec<u32> = attrs.iter().filter_map(|a| a.uid).collect();
        assert_eq!(order, vec![3, 4, 1, 2]);
    }

    #[test]
    fn proxy_status_line() {
        assert_eq!(proxy_status("HTTP/1.1 200 Connection established"), Some(200));
        assert_eq!(proxy_status("HTTP/1.0 407 Proxy Authentication Required"), Some(407));
        assert_eq!(proxy_status("garbage"), None);
    }
}
