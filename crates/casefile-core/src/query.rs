//! Timeline search box parser.
//!
//! Turns `hello "two words" tag:web !tag:noise range:2024-01-01,2024-01-31`
//! into [`TimelineFilters`]. Whitespace separates tokens unless quoted. The
//! text before the first `:` of a token is its key. A `!` in front of the
//! key (`!tag:noise`) or of the value (`tag:!noise`) excludes instead of
//! includes. Free text keeps a leading `!` verbatim; `meta`, `linked` and
//! `sort` cannot be negated.

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::defaults::{END_OF_DAY_HMS, MAX_FILTER_VALUES};
use crate::error::{Error, Result};
use crate::filter::{DateRange, FilterModifier, FilterValue, FilterValues, TimelineFilters};

/// One `key:value` token. Bare text has an empty key; `negated` records a
/// `!` written in front of the key.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Token {
    key: String,
    negated: bool,
    value: String,
}

impl Token {
    fn new(key: Option<String>, value: String) -> Self {
        let key = key.unwrap_or_default();
        match key.strip_prefix('!') {
            Some(rest) => Token {
                key: rest.to_string(),
                negated: true,
                value,
            },
            None => Token {
                key,
                negated: false,
                value,
            },
        }
    }
}

fn tokenize(query: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut key: Option<String> = None;
    let mut current = String::new();
    let mut in_quote = false;

    for c in query.chars() {
        match c {
            c if c.is_whitespace() && !in_quote => {
                if !current.is_empty() {
                    tokens.push(Token::new(key.take(), std::mem::take(&mut current)));
                }
                key = None;
            }
            '"' => in_quote = !in_quote,
            ':' if key.is_none() && !in_quote => {
                key = Some(std::mem::take(&mut current));
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(Token::new(key, current));
    }
    tokens
}

/// Value and modifier of a term; a `!` on either the key or the value negates.
fn split_modifier(raw: &str, negated: bool) -> (&str, FilterModifier) {
    match raw.strip_prefix('!') {
        Some(rest) => (rest, FilterModifier::Not),
        None if negated => (raw, FilterModifier::Not),
        None => (raw, FilterModifier::Normal),
    }
}

fn reject_negation(key: &str, negated: bool) -> Result<()> {
    if negated {
        return Err(Error::InvalidInput(format!("'{}' cannot be negated", key)));
    }
    Ok(())
}

fn parse_text(raw: &str) -> Result<String> {
    Ok(raw.to_string())
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| Error::InvalidInput(format!("'{}' is not a valid UUID", raw)))
}

/// RFC 3339, or `YYYY-MM-DD` at midnight UTC. With `end_of_day`, a
/// date-only value lands on the last second of that day instead.
fn parse_time(raw: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }
    let invalid = || {
        Error::InvalidInput(format!(
            "range bounds must be RFC 3339 or YYYY-MM-DD (got '{}')",
            raw
        ))
    };
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| invalid())?;
    let (h, m, s) = if end_of_day { END_OF_DAY_HMS } else { (0, 0, 0) };
    date.and_hms_opt(h, m, s)
        .map(|naive| naive.and_utc())
        .ok_or_else(invalid)
}

fn parse_range(raw: &str) -> Result<DateRange> {
    let (from, to) = raw.split_once(',').ok_or_else(|| {
        Error::InvalidInput(format!(
            "range must be in the format <from>,<to> (got '{}')",
            raw
        ))
    })?;
    let range = DateRange::new(parse_time(from, false)?, parse_time(to, true)?);
    if range.from > range.to {
        return Err(Error::InvalidInput(format!(
            "range start is after its end (got '{}')",
            raw
        )));
    }
    Ok(range)
}

fn parse_linked(raw: &str) -> Result<Option<bool>> {
    match raw.to_ascii_lowercase().as_str() {
        "all" => Ok(None),
        "true" | "t" | "1" => Ok(Some(true)),
        "false" | "f" | "0" => Ok(Some(false)),
        _ => Err(Error::InvalidInput(format!(
            "linked must be true, false or all (got '{}')",
            raw
        ))),
    }
}

fn is_ascending(raw: &str) -> bool {
    matches!(
        raw.to_ascii_lowercase().as_str(),
        "asc" | "ascending" | "chronological"
    )
}

fn push_term<T: Clone>(
    field: &mut FilterValues<T>,
    raw: &str,
    negated: bool,
    parse: impl FnOnce(&str) -> Result<T>,
) -> Result<()> {
    let (value, modifier) = split_modifier(raw, negated);
    field.push(FilterValue::new(parse(value)?, modifier));
    Ok(())
}

fn check_value_limit<T: Clone>(key: &str, field: &FilterValues<T>) -> Result<()> {
    let split = field.split_by_modifier();
    if split.normal.len() > MAX_FILTER_VALUES || split.not.len() > MAX_FILTER_VALUES {
        return Err(Error::InvalidInput(format!(
            "too many '{}' values (limit {})",
            key, MAX_FILTER_VALUES
        )));
    }
    Ok(())
}

/// Parse a timeline search query.
pub fn parse_timeline_query(query: &str) -> Result<TimelineFilters> {
    let mut filters = TimelineFilters::new();
    let mut linked_seen = false;
    let mut sort_seen = false;

    for Token {
        key,
        negated,
        value,
    } in tokenize(query)
    {
        match key.as_str() {
            "" => {
                reject_negation("text", negated)?;
                filters.text.push(value)
            }
            "meta" => {
                reject_negation("meta", negated)?;
                filters.metadata.push(value)
            }
            "tag" => push_term(&mut filters.tags, &value, negated, parse_text)?,
            "operator" => push_term(&mut filters.operator, &value, negated, parse_text)?,
            "type" => push_term(&mut filters.content_type, &value, negated, parse_text)?,
            "uuid" => push_term(&mut filters.uuid, &value, negated, parse_uuid)?,
            "with-evidence" => {
                push_term(&mut filters.with_evidence_uuid, &value, negated, parse_uuid)?
            }
            "range" => push_term(&mut filters.date_ranges, &value, negated, parse_range)?,
            "linked" => {
                reject_negation("linked", negated)?;
                if linked_seen {
                    return Err(Error::InvalidInput(
                        "linked can only be specified once".to_string(),
                    ));
                }
                linked_seen = true;
                filters.linked = parse_linked(&value)?;
            }
            "sort" => {
                reject_negation("sort", negated)?;
                if sort_seen {
                    return Err(Error::InvalidInput(
                        "only one sort direction can be specified".to_string(),
                    ));
                }
                sort_seen = true;
                filters.sort_asc = is_ascending(&value);
            }
            other => {
                return Err(Error::InvalidInput(format!(
                    "unknown filter key '{}'",
                    other
                )))
            }
        }
    }

    if filters.text.len() > MAX_FILTER_VALUES || filters.metadata.len() > MAX_FILTER_VALUES {
        return Err(Error::InvalidInput(format!(
            "too many text terms (limit {})",
            MAX_FILTER_VALUES
        )));
    }
    check_value_limit("tag", &filters.tags)?;
    check_value_limit("operator", &filters.operator)?;
    check_value_limit("type", &filters.content_type)?;
    check_value_limit("uuid", &filters.uuid)?;
    check_value_limit("with-evidence", &filters.with_evidence_uuid)?;
    check_value_limit("range", &filters.date_ranges)?;

    Ok(filters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_tokenize_quotes_and_keys() {
        let tokens = tokenize(r#"foo "bar baz" tag:"fizz buzz""#);
        assert_eq!(
            tokens,
            vec![
                Token { key: String::new(), negated: false, value: "foo".into() },
                Token { key: String::new(), negated: false, value: "bar baz".into() },
                Token { key: "tag".into(), negated: false, value: "fizz buzz".into() },
            ]
        );
    }

    #[test]
    fn test_tokenize_keeps_colons_after_key() {
        let tokens = tokenize("range:2024-01-01T10:00:00Z,2024-01-02");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].key, "range");
        assert_eq!(tokens[0].value, "2024-01-01T10:00:00Z,2024-01-02");
    }

    #[test]
    fn test_empty_query() {
        assert_eq!(parse_timeline_query("   ").unwrap(), TimelineFilters::new());
    }

    #[test]
    fn test_text_and_meta_terms() {
        let filters = parse_timeline_query(r#"hello "two words" meta:ip=10.0.0.1"#).unwrap();
        assert_eq!(filters.text, vec!["hello", "two words"]);
        assert_eq!(filters.metadata, vec!["ip=10.0.0.1"]);
    }

    #[test]
    fn test_tag_modifiers() {
        let filters = parse_timeline_query("tag:web !tag:noise tag:Db").unwrap();
        let split = filters.tags.split_by_modifier();
        assert_eq!(split.normal, vec!["web", "Db"]);
        assert_eq!(split.not, vec!["noise"]);
    }

    #[test]
    fn test_tokenize_negated_key() {
        let tokens = tokenize("!tag:noise tag:!other");
        assert_eq!(tokens[0].key, "tag");
        assert!(tokens[0].negated);
        assert_eq!(tokens[0].value, "noise");
        assert!(!tokens[1].negated);
        assert_eq!(tokens[1].value, "!other");
    }

    #[test]
    fn test_negation_on_key_or_value() {
        let filters = parse_timeline_query("!tag:noise tag:!other !operator:bob").unwrap();
        assert_eq!(filters.tags.split_by_modifier().not, vec!["noise", "other"]);
        assert!(filters.tags.split_by_modifier().normal.is_empty());
        assert_eq!(filters.operator.split_by_modifier().not, vec!["bob"]);
    }

    #[test]
    fn test_negated_bare_text_is_literal() {
        let filters = parse_timeline_query("!important").unwrap();
        assert_eq!(filters.text, vec!["!important"]);
    }

    #[test]
    fn test_unsupported_negation_rejected() {
        for query in ["!meta:ip=1", "!linked:true", "!sort:asc"] {
            let err = parse_timeline_query(query).unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "{query}");
        }
    }

    #[test]
    fn test_uuid_fields() {
        let id = Uuid::new_v4();
        let filters = parse_timeline_query(&format!("uuid:{id} !with-evidence:{id}")).unwrap();
        assert_eq!(filters.uuid.values(), vec![id]);
        assert_eq!(filters.with_evidence_uuid.split_by_modifier().not, vec![id]);
    }

    #[test]
    fn test_invalid_uuid_rejected() {
        let err = parse_timeline_query("uuid:nope").unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_range_date_only_to_is_end_of_day() {
        let filters = parse_timeline_query("range:2024-03-01,2024-03-02").unwrap();
        let range = filters.date_ranges.values()[0];
        assert_eq!(range.from, utc(2024, 3, 1, 0, 0, 0));
        assert_eq!(range.to, utc(2024, 3, 2, 23, 59, 59));
    }

    #[test]
    fn test_range_rfc3339_bounds_and_exclusion() {
        let filters =
            parse_timeline_query("!range:2024-03-01T08:00:00Z,2024-03-01T09:30:00+01:00").unwrap();
        let split = filters.date_ranges.split_by_modifier();
        assert!(split.normal.is_empty());
        assert_eq!(split.not[0].from, utc(2024, 3, 1, 8, 0, 0));
        assert_eq!(split.not[0].to, utc(2024, 3, 1, 8, 30, 0));
    }

    #[test]
    fn test_multiple_ranges_kept_in_order() {
        let filters =
            parse_timeline_query("range:2024-01-01,2024-01-02 range:2024-02-01,2024-02-02")
                .unwrap();
        assert_eq!(filters.date_ranges.len(), 2);
        assert_eq!(filters.date_ranges.values()[1].from, utc(2024, 2, 1, 0, 0, 0));
    }

    #[test]
    fn test_malformed_ranges_rejected() {
        for query in [
            "range:2024-01-01",
            "range:yesterday,today",
            "range:2024-02-01,2024-01-01",
        ] {
            let err = parse_timeline_query(query).unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "{query}");
        }
    }

    #[test]
    fn test_linked_values() {
        assert_eq!(parse_timeline_query("linked:true").unwrap().linked, Some(true));
        assert_eq!(parse_timeline_query("linked:False").unwrap().linked, Some(false));
        assert_eq!(parse_timeline_query("linked:all").unwrap().linked, None);
        assert!(parse_timeline_query("linked:maybe").is_err());
        assert!(parse_timeline_query("linked:true linked:false").is_err());
    }

    #[test]
    fn test_sort_direction() {
        assert!(parse_timeline_query("sort:asc").unwrap().sort_asc);
        assert!(parse_timeline_query("sort:Chronological").unwrap().sort_asc);
        assert!(!parse_timeline_query("sort:desc").unwrap().sort_asc);
        assert!(parse_timeline_query("sort:asc sort:desc").is_err());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = parse_timeline_query("is:event").unwrap_err();
        assert!(err.to_string().contains("is"));
    }

    #[test]
    fn test_value_limit_enforced() {
        let query: Vec<String> = (0..=MAX_FILTER_VALUES).map(|i| format!("tag:t{i}")).collect();
        let err = parse_timeline_query(&query.join(" ")).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let query: Vec<String> = (0..MAX_FILTER_VALUES).map(|i| format!("tag:t{i}")).collect();
        assert!(parse_timeline_query(&query.join(" ")).is_ok());
    }
}
