use phonenumber::country::Id as CountryId;
use phonenumber::Mode;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PhoneError {
    #[error("phone number is empty")]
    Empty,
    #[error("phone number '{0}' has too few digits")]
    TooShort(String),
    #[error("phone number '{0}' has too many digits")]
    TooLong(String),
}

const MIN_DIGITS: usize = 10;
const MAX_DIGITS: usize = 15;

/// Normalize a scraped phone number to E.164 (`+15551234567`).
///
/// Numbers without a country code are read as US numbers. The CRM shows
/// formats like `+1 555-123-4567`, `(555) 123-4567` and `5551234567`, and fake
/// 555 exchanges must survive, so validity is not enforced beyond length: when
/// libphonenumber rejects the input we fall back to the digits themselves.
pub fn normalize_phone(raw: &str) -> Result<String, PhoneError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PhoneError::Empty);
    }

    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < MIN_DIGITS {
        return Err(PhoneError::TooShort(trimmed.to_string()));
    }
    if digits.len() > MAX_DIGITS {
        return Err(PhoneError::TooLong(trimmed.to_string()));
    }

    match phonenumber::parse(Some(CountryId::US), trimmed) {
        Ok(number) => {
            if !phonenumber::is_valid(&number) {
                tracing::debug!("Phone {} is not a valid assigned number, keeping it", trimmed);
            }
            Ok(number.format().mode(Mode::E164).to_string())
        }
        Err(e) => {
            tracing::debug!("Falling back to digit normalization for '{}': {:?}", trimmed, e);
            Ok(normalize_digits(trimmed.starts_with('+'), &digits))
        }
    }
}

fn normalize_digits(has_plus: bool, digits: &str) -> String {
    if has_plus {
        format!("+{}", digits)
    } else if digits.len() == 10 {
        format!("+1{}", digits)
    } else {
        format!("+{}", digits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_us_formats_normalize_to_e164() {
        let formats = [
            "+15551234567",
            "+1 555-123-4567",
            "(555) 123-4567",
            "555-123-4567",
            "5551234567",
            "1 555 123 4567",
        ];

        for format in formats {
            assert_eq!(
                normalize_phone(format).unwrap(),
                "+15551234567",
                "Failed for format: {}",
                format
            );
        }
    }

    #[test]
    fn test_rejects_empty_and_short() {
        assert_eq!(normalize_phone("   "), Err(PhoneError::Empty));
        assert!(matches!(normalize_phone("12345"), Err(PhoneError::TooShort(_))));
        assert!(matches!(
            normalize_phone("1234567890123456789"),
            Err(PhoneError::TooLong(_))
        ));
    }

    #[test]
    fn test_digit_fallback() {
        assert_eq!(normalize_digits(false, "5551234567"), "+15551234567");
        assert_eq!(normalize_digits(true, "447700900123"), "+447700900123");
        assert_eq!(normalize_digits(false, "15551234567"), "+15551234567");
    }
}
