//! Bet record value type.

use std::fmt;

/// Number drawn in the lottery. A bet on it wins.
pub const LOTTERY_WINNER_NUMBER: u32 = 7574;

/// A single decoded bet submission.
///
/// Built for each line of an accepted frame by [`crate::protocol::parse_bets`],
/// handed to the store and then dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BetRecord {
    /// Identifier of the submitting agency
    pub agency: String,
    pub first_name: String,
    pub last_name: String,
    /// Numeric identity document
    pub document: String,
    /// `YYYY-MM-DD`
    pub birth_date: String,
    /// The chosen number
    pub number: String,
}

impl BetRecord {
    /// Fields in wire and storage order.
    pub fn fields(&self) -> [&str; 6] {
        [
            &self.agency,
            &self.first_name,
            &self.last_name,
            &self.document,
            &self.birth_date,
            &self.number,
        ]
    }

    pub fn has_won(&self) -> bool {
        self.number.parse::<u32>() == Ok(LOTTERY_WINNER_NUMBER)
    }
}

impl fmt::Display for BetRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fields().join(";"))
    }
}
