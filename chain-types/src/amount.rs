/// Minimal-unit integer amount. 128-bit so a single amount type safely
/// covers both native-coin quantities and large contract-token supplies
/// without truncation.
pub type Amount = u128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmountParseError {
    pub input: String,
}

impl std::fmt::Display for AmountParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "malformed minimal-unit amount: {:?}", self.input)
    }
}

impl std::error::Error for AmountParseError {}

/// Parses a decimal string of minimal units: it must be a non-negative
/// integer. Leading zeros are tolerated; any other non-digit content is
/// rejected.
pub fn parse_minimal_units(raw: &str) -> Result<Amount, AmountParseError> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AmountParseError {
            input: raw.to_string(),
        });
    }
    raw.parse::<Amount>().map_err(|_| AmountParseError {
        input: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_integer() {
        assert_eq!(parse_minimal_units("1000000").unwrap(), 1_000_000);
    }

    #[test]
    fn rejects_negative_and_decimal() {
        assert!(parse_minimal_units("-5").is_err());
        assert!(parse_minimal_units("1.5").is_err());
        assert!(parse_minimal_units("").is_err());
    }

    #[test]
    fn tolerates_leading_zeros() {
        assert_eq!(parse_minimal_units("007").unwrap(), 7);
    }
}
