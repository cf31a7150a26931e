//! Bet payload parser.
//!
//! A payload holds one bet per line, six `;`-separated fields each:
//!
//! ```text
//! agency;first_name;last_name;document;birth_date[ ignored];number
//! agency;first_name;last_name;document;birth_date[ ignored];number
//! ```
//!
//! The fifth field is cut at its first space; whatever follows the space is
//! dropped. Trailing whitespace on the whole payload (a newline sent by the
//! client inside the declared length, for instance) is ignored.

use chrono::NaiveDate;
use std::fmt;

use crate::bet::BetRecord;

/// Number of `;`-separated fields in a bet payload.
pub const FIELD_COUNT: usize = 6;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Reasons a payload cannot become a [`BetRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Payload is not valid UTF-8
    InvalidUtf8,
    /// Wrong number of `;`-separated fields
    FieldCount(usize),
    /// A required field is empty
    EmptyField(&'static str),
    /// A numeric field contains something other than ASCII digits
    NotNumeric { field: &'static str, value: String },
    /// Birth date is not a `YYYY-MM-DD` calendar date
    InvalidDate(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::InvalidUtf8 => write!(f, "payload is not valid UTF-8"),
            ParseError::FieldCount(n) => {
                write!(f, "expected {} fields, got {}", FIELD_COUNT, n)
            }
            ParseError::EmptyField(field) => write!(f, "field '{}' is empty", field),
            ParseError::NotNumeric { field, value } => {
                write!(f, "field '{}' is not numeric: {}", field, value)
            }
            ParseError::InvalidDate(value) => write!(f, "invalid birth date: {}", value),
        }
    }
}

impl std::error::Error for ParseError {}

/// Parse a complete frame payload into its bets.
///
/// Fails as a whole if any line is malformed, so a batch is never stored
/// partially.
pub fn parse_bets(payload: &[u8]) -> Result<Vec<BetRecord>, ParseError> {
    let text = std::str::from_utf8(payload).map_err(|_| ParseError::InvalidUtf8)?;
    text.trim_end().split('\n').map(parse_bet).collect()
}

/// Parse a single `;`-separated bet line.
pub fn parse_bet(line: &str) -> Result<BetRecord, ParseError> {
    let parts: Vec<&str> = line.trim_end().split(';').collect();
    if parts.len() != FIELD_COUNT {
        return Err(ParseError::FieldCount(parts.len()));
    }

    let birth_date = parts[4].split(' ').next().unwrap_or_default();

    let bet = BetRecord {
        agency: numeric("agency", parts[0])?,
        first_name: required("first_name", parts[1])?,
        last_name: required("last_name", parts[2])?,
        document: numeric("document", parts[3])?,
        birth_date: date(birth_date)?,
        number: numeric("number", parts[5])?,
    };

    Ok(bet)
}

fn required(field: &'static str, value: &str) -> Result<String, ParseError> {
    if value.is_empty() {
        return Err(ParseError::EmptyField(field));
    }
    Ok(value.to_string())
}

fn numeric(field: &'static str, value: &str) -> Result<String, ParseError> {
    let value = required(field, value)?;
    if !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::NotNumeric { field, value });
    }
    Ok(value)
}

fn date(value: &str) -> Result<String, ParseError> {
    let value = required("birth_date", value)?;
    // chrono accepts unpadded components, so also pin the width
    if value.len() != 10 || NaiveDate::parse_from_str(&value, DATE_FORMAT).is_err() {
        return Err(ParseError::InvalidDate(value));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn juan() -> BetRecord {
        BetRecord {
            agency: "1".to_string(),
            first_name: "Juan".to_string(),
            last_name: "Perez".to_string(),
            document: "30904465".to_string(),
            birth_date: "1999-03-17".to_string(),
            number: "7723".to_string(),
        }
    }

    #[test]
    fn test_parse_valid_bet() {
        let bet = parse_bet("1;Juan;Perez;30904465;1999-03-17;7723").unwrap();
        assert_eq!(bet, juan());
    }

    #[test]
    fn test_birth_date_remainder_is_dropped() {
        let bet = parse_bet("1;Juan;Perez;30904465;1999-03-17 00:00:00;7723").unwrap();
        assert_eq!(bet.birth_date, "1999-03-17");
        assert_eq!(bet.number, "7723");
    }

    #[test]
    fn test_trailing_newline_is_ignored() {
        let bet = parse_bet("1;Juan;Perez;30904465;1999-03-17;7723\n").unwrap();
        assert_eq!(bet, juan());
    }

    #[test]
    fn test_reparse_of_display_is_identity() {
        let bet = juan();
        assert_eq!(parse_bet(&bet.to_string()).unwrap(), bet);
    }

    #[test]
    fn test_non_ascii_names() {
        let bet = parse_bet("7;María José;Núñez;1234;2001-12-31;1").unwrap();
        assert_eq!(bet.first_name, "María José");
        assert_eq!(bet.last_name, "Núñez");
    }

    #[test]
    fn test_too_few_fields() {
        assert_eq!(
            parse_bet("1;Juan;Perez;30904465;1999-03-17"),
            Err(ParseError::FieldCount(5))
        );
    }

    #[test]
    fn test_too_many_fields() {
        assert_eq!(
            parse_bet("1;Juan;Perez;30904465;1999-03-17;7723;extra"),
            Err(ParseError::FieldCount(7))
        );
    }

    #[test]
    fn test_empty_field() {
        assert_eq!(
            parse_bet("1;;Perez;30904465;1999-03-17;7723"),
            Err(ParseError::EmptyField("first_name"))
        );
        assert_eq!(
            parse_bet("1;Juan;Perez;30904465; 1999-03-17;7723"),
            Err(ParseError::EmptyField("birth_date"))
        );
    }

    #[test]
    fn test_non_numeric_fields() {
        assert_eq!(
            parse_bet("1;Juan;Perez;30904465;1999-03-17;seven"),
            Err(ParseError::NotNumeric {
                field: "number",
                value: "seven".to_string()
            })
        );
        assert!(matches!(
            parse_bet("A1;Juan;Perez;30904465;1999-03-17;7723"),
            Err(ParseError::NotNumeric { field: "agency", .. })
        ));
    }

    #[test]
    fn test_invalid_dates() {
        for date in ["1999-02-30", "17-03-1999", "1999-3-17", "yesterday"] {
            let payload = format!("1;Juan;Perez;30904465;{};7723", date);
            assert_eq!(
                parse_bet(&payload),
                Err(ParseError::InvalidDate(date.to_string())),
                "{date}"
            );
        }
    }

    #[test]
    fn test_invalid_utf8() {
        assert_eq!(parse_bets(&[0xff, 0xfe, b';']), Err(ParseError::InvalidUtf8));
    }

    #[test]
    fn test_single_bet_payload() {
        let bets = parse_bets(b"1;Juan;Perez;30904465;1999-03-17;7723\n").unwrap();
        assert_eq!(bets, vec![juan()]);
    }

    #[test]
    fn test_batch_payload() {
        let payload = b"1;Juan;Perez;30904465;1999-03-17;7723\r\n\
                        1;Ana;Gomez;28111222;1980-01-02;15\n";
        let bets = parse_bets(payload).unwrap();
        assert_eq!(bets.len(), 2);
        assert_eq!(bets[0], juan());
        assert_eq!(bets[1].first_name, "Ana");
        assert_eq!(bets[1].number, "15");
    }

    #[test]
    fn test_batch_rejected_when_any_line_is_malformed() {
        let payload = b"1;Juan;Perez;30904465;1999-03-17;7723\n1;Ana;Gomez;28111222";
        assert_eq!(parse_bets(payload), Err(ParseError::FieldCount(4)));

        let payload = b"1;Juan;Perez;30904465;1999-03-17;7723\n\n\
                        1;Ana;Gomez;28111222;1980-01-02;15";
        assert_eq!(parse_bets(payload), Err(ParseError::FieldCount(1)));
    }
}
