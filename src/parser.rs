// 🔎 Description Parser - installment markers
//
// "Rent 1/3" → installment 1 of 3, prefix "Rent "
//
// Only a marker at the very end of the description counts. Anything that does
// not describe a real chain (quantity <= 1, installment 0, installment past
// the quantity, numbers too large) is simply "no marker".

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    // ASCII digits only; \d would also accept other scripts' digits
    static ref MARKER_REGEX: Regex =
        Regex::new(r"([0-9]+)/([0-9]+)$").expect("hardcoded regex should be valid");
}

// ============================================================================
// INSTALLMENT MARKER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallmentMarker {
    /// Current position (1-based)
    pub installment: u32,

    /// Total chain length (always >= 2)
    pub quantity: u32,

    /// Description text before the marker, untrimmed
    pub prefix: String,
}

impl InstallmentMarker {
    /// Description without the marker
    pub fn stripped_description(&self) -> &str {
        self.prefix.trim()
    }

    /// Description for the chain member at `position`
    ///
    /// Example: prefix "Rent ", quantity 3 → label(2) = "Rent 2/3"
    pub fn label(&self, position: u32) -> String {
        label(&self.prefix, position, self.quantity)
    }
}

/// "<prefix><position>/<quantity>"
pub fn label(prefix: &str, position: u32, quantity: u32) -> String {
    format!("{}{}/{}", prefix, position, quantity)
}

/// Extract the trailing installment marker of a description
pub fn parse_installments(description: &str) -> Option<InstallmentMarker> {
    let captures = MARKER_REGEX.captures(description)?;
    let whole = captures.get(0)?;

    let installment: u32 = captures.get(1)?.as_str().parse().ok()?;
    let quantity: u32 = captures.get(2)?.as_str().parse().ok()?;

    if installment > quantity || quantity <= 1 || installment == 0 {
        return None;
    }

    Some(InstallmentMarker {
        installment,
        quantity,
        prefix: description[..whole.start()].to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_marker() {
        let marker = parse_installments("Rent 1/3").unwrap();

        assert_eq!(marker.installment, 1);
        assert_eq!(marker.quantity, 3);
        assert_eq!(marker.prefix, "Rent ");
        assert_eq!(marker.stripped_description(), "Rent");
    }

    #[test]
    fn test_marker_must_be_trailing() {
        assert!(parse_installments("1/3 Rent").is_none());
        assert!(parse_installments("Rent 1/3 ").is_none());
        assert!(parse_installments("Rent").is_none());
        assert!(parse_installments("").is_none());
    }

    #[test]
    fn test_marker_without_space() {
        let marker = parse_installments("TV10/12").unwrap();
        assert_eq!(marker.installment, 10);
        assert_eq!(marker.quantity, 12);
        assert_eq!(marker.prefix, "TV");
        assert_eq!(marker.label(11), "TV11/12");
    }

    #[test]
    fn test_invalid_numbers_are_no_marker() {
        assert!(parse_installments("Gym 1/1").is_none(), "quantity must be > 1");
        assert!(parse_installments("Gym 0/3").is_none(), "installment must be > 0");
        assert!(parse_installments("Gym 4/3").is_none(), "installment must be <= quantity");
        assert!(parse_installments("Gym 1/0").is_none());
        assert!(
            parse_installments("Gym 1/99999999999999999999").is_none(),
            "overflowing numbers are no marker"
        );
    }

    #[test]
    fn test_last_marker_wins_on_nested_slashes() {
        let marker = parse_installments("a 1/2/3").unwrap();
        assert_eq!(marker.installment, 2);
        assert_eq!(marker.quantity, 3);
        assert_eq!(marker.prefix, "a 1/");
    }

    #[test]
    fn test_non_ascii_digits_are_ignored() {
        // Arabic-Indic digits
        assert!(parse_installments("Rent ١/٣").is_none());
        // Unicode text before the marker is kept intact
        let marker = parse_installments("Café ☕ 2/4").unwrap();
        assert_eq!(marker.stripped_description(), "Café ☕");
    }

    #[test]
    fn test_label_roundtrip() {
        for (text, i, q) in [("Rent ", 1, 3), ("Notebook ", 7, 10), ("x", 2, 2)] {
            let description = label(text, i, q);
            let marker = parse_installments(&description).unwrap();
            assert_eq!(marker.installment, i);
            assert_eq!(marker.quantity, q);
            assert_eq!(marker.stripped_description(), text.trim());
            assert_eq!(marker.label(i), description);
        }
    }
}
