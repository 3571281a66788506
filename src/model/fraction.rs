use serde::{Deserialize, Serialize};

/// A `numerator / denominator` pair whose ratio is defined for every input.
///
/// A zero denominator is a valid degenerate case (nothing attempted, nothing
/// measured) and yields a ratio of `0.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Fraction {
    pub numerator: u64,
    pub denominator: u64,
}

impl Fraction {
    pub const ZERO: Fraction = Fraction {
        numerator: 0,
        denominator: 0,
    };

    pub fn new(numerator: u64, denominator: u64) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    pub fn ratio(&self) -> f64 {
        if self.denominator == 0 {
            0.0
        } else {
            self.numerator as f64 / self.denominator as f64
        }
    }

    pub fn percent(&self) -> f64 {
        self.ratio() * 100.0
    }
}

impl std::fmt::Display for Fraction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_denominator_ratio_is_zero() {
        for numerator in [0, 1, 7, u64::MAX] {
            let ratio = Fraction::new(numerator, 0).ratio();
            assert_eq!(ratio, 0.0);
            assert!(!ratio.is_nan());
        }
    }

    #[test]
    fn test_ratio_is_exact_division() {
        assert_eq!(Fraction::new(1, 2).ratio(), 0.5);
        assert_eq!(Fraction::new(3, 3).ratio(), 1.0);
        assert_eq!(Fraction::new(0, 5).ratio(), 0.0);
        assert_eq!(Fraction::new(2, 3).ratio(), 2.0 / 3.0);
    }

    #[test]
    fn test_percent() {
        assert_eq!(Fraction::new(1, 4).percent(), 25.0);
        assert_eq!(Fraction::ZERO.percent(), 0.0);
    }

    #[test]
    fn test_display_and_json() {
        let fraction = Fraction::new(1, 2);
        assert_eq!(fraction.to_string(), "1/2");
        assert_eq!(
            serde_json::to_string(&fraction).unwrap(),
            r#"{"numerator":1,"denominator":2}"#
        );
    }
}
