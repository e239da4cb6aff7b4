/// Domain suffix appended to every canonical destination address.
pub const ADDRESS_SUFFIX: &str = "@s.whatsapp.net";

/// Country code prepended when a destination lacks one.
pub const DEFAULT_COUNTRY_CODE: &str = "972";

/// Normalize a destination into canonical transport form: strip everything
/// that is not a digit, prepend the country code when missing (dropping a
/// single leading local-trunk `0` first), append the domain suffix.
///
/// Idempotent on canonical input: the suffix carries no digits, so feeding a
/// canonical address back through yields the same string.
pub fn normalize(raw: &str, country_code: &str) -> String {
    let mut digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if !digits.starts_with(country_code) {
        let trimmed = digits.strip_prefix('0').unwrap_or(&digits);
        digits = format!("{country_code}{trimmed}");
    }
    format!("{digits}{ADDRESS_SUFFIX}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_number_gains_country_code() {
        assert_eq!(
            normalize("0501234567", DEFAULT_COUNTRY_CODE),
            "972501234567@s.whatsapp.net"
        );
    }

    #[test]
    fn international_number_kept_as_is() {
        assert_eq!(
            normalize("972501234567", DEFAULT_COUNTRY_CODE),
            "972501234567@s.whatsapp.net"
        );
    }

    #[test]
    fn punctuation_is_stripped() {
        assert_eq!(
            normalize("+972 50-123-4567", DEFAULT_COUNTRY_CODE),
            "972501234567@s.whatsapp.net"
        );
    }

    #[test]
    fn idempotent_on_canonical_input() {
        let once = normalize("0501234567", DEFAULT_COUNTRY_CODE);
        let twice = normalize(&once, DEFAULT_COUNTRY_CODE);
        assert_eq!(once, twice);
    }

    #[test]
    fn only_first_trunk_zero_is_stripped() {
        assert_eq!(
            normalize("00501234567", DEFAULT_COUNTRY_CODE),
            "9720501234567@s.whatsapp.net"
        );
    }

    #[test]
    fn other_country_code() {
        assert_eq!(normalize("07911123456", "44"), "447911123456@s.whatsapp.net");
    }
}
