//! Password policies and generation.

use rand::{rngs::OsRng, Rng};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use lockbox_common::{Error, Result, Secret};

const LOWER: &str = "abcdefghijklmnopqrstuvwxyz";
const UPPER: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &str = "0123456789";
const GENERATOR_SYMBOLS: &str = "!@#$%&*()_+-=[]?";

/// Characters that satisfy the special-character rule of [`PasswordPolicy::Strong`].
pub const POLICY_SYMBOLS: &str = "!@#$%^&*()_+=";

/// Minimum strength required for a new password.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PasswordPolicy {
    /// At least 6 characters.
    Simple,
    /// At least 8 characters with an uppercase letter, a lowercase letter and a digit.
    #[default]
    Recommended,
    /// At least 12 characters with upper, lower, digit and a symbol.
    Strong,
}

impl PasswordPolicy {
    /// Check a candidate password.
    ///
    /// # Errors
    /// - `InvalidInput` naming the first unmet requirement
    pub fn validate(&self, password: &str) -> Result<()> {
        let (min_len, classes) = match self {
            PasswordPolicy::Simple => (6, false),
            PasswordPolicy::Recommended => (8, true),
            PasswordPolicy::Strong => (12, true),
        };

        let reject = |msg: &str| -> Result<()> { Err(Error::InvalidInput(msg.to_string())) };

        if password.chars().count() < min_len {
            return Err(Error::InvalidInput(format!(
                "Password must be at least {} characters",
                min_len
            )));
        }
        if classes {
            if !password.chars().any(|c| c.is_ascii_uppercase()) {
                return reject("Password needs an uppercase letter");
            }
            if !password.chars().any(|c| c.is_ascii_lowercase()) {
                return reject("Password needs a lowercase letter");
            }
            if !password.chars().any(|c| c.is_ascii_digit()) {
                return reject("Password needs a digit");
            }
        }
        if *self == PasswordPolicy::Strong && !password.chars().any(|c| POLICY_SYMBOLS.contains(c))
        {
            return reject("Password needs a symbol");
        }
        Ok(())
    }
}

impl FromStr for PasswordPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "simple" => Ok(PasswordPolicy::Simple),
            "recommended" => Ok(PasswordPolicy::Recommended),
            "strong" => Ok(PasswordPolicy::Strong),
            other => Err(Error::InvalidInput(format!(
                "Unknown password policy: {}",
                other
            ))),
        }
    }
}

/// Random password generator.
///
/// Lowercase letters are always included; the flags add the other sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordGenerator {
    pub upper: bool,
    pub digits: bool,
    pub symbols: bool,
    pub length: usize,
}

impl Default for PasswordGenerator {
    fn default() -> Self {
        Self {
            upper: true,
            digits: true,
            symbols: true,
            length: 16,
        }
    }
}

impl PasswordGenerator {
    fn charset(&self) -> Vec<char> {
        let mut set: String = LOWER.to_string();
        if self.upper {
            set.push_str(UPPER);
        }
        if self.digits {
            set.push_str(DIGITS);
        }
        if self.symbols {
            set.push_str(GENERATOR_SYMBOLS);
        }
        set.chars().collect()
    }

    /// Generate a password.
    ///
    /// # Errors
    /// - `InvalidInput` if `length` is 0
    pub fn generate(&self) -> Result<Secret> {
        if self.length == 0 {
            return Err(Error::InvalidInput(
                "Password length must be positive".to_string(),
            ));
        }

        let charset = self.charset();
        let mut rng = OsRng;
        let password: String = (0..self.length)
            .map(|_| charset[rng.gen_range(0..charset.len())])
            .collect();

        Ok(Secret::from(password))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_policy() {
        assert!(PasswordPolicy::Simple.validate("abcdef").is_ok());
        assert!(PasswordPolicy::Simple.validate("abcde").is_err());
    }

    #[test]
    fn test_recommended_policy() {
        let policy = PasswordPolicy::Recommended;
        assert!(policy.validate("Passw0rd").is_ok());
        assert!(policy.validate("password1").is_err());
        assert!(policy.validate("PASSWORD1").is_err());
        assert!(policy.validate("Password").is_err());
        assert!(policy.validate("Pa55w0r").is_err());
    }

    #[test]
    fn test_strong_policy() {
        let policy = PasswordPolicy::Strong;
        assert!(policy.validate("Tr0ub4dor&3xyz").is_ok());
        assert!(policy.validate("Tr0ub4dor&3").is_err());
        assert!(policy.validate("Tr0ub4dor-3xyz").is_err());
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!(
            "STRONG".parse::<PasswordPolicy>().unwrap(),
            PasswordPolicy::Strong
        );
        assert!("weak".parse::<PasswordPolicy>().is_err());
    }

    #[test]
    fn test_generator_charset() {
        let generator = PasswordGenerator {
            upper: false,
            digits: true,
            symbols: false,
            length: 64,
        };

        let password = generator.generate().unwrap();
        let text = password.as_str().unwrap();
        assert_eq!(text.len(), 64);
        assert!(text
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_generator_symbols() {
        let generator = PasswordGenerator {
            length: 200,
            ..PasswordGenerator::default()
        };

        let password = generator.generate().unwrap();
        let text = password.as_str().unwrap();
        assert!(text.chars().all(|c| c.is_ascii_alphanumeric()
            || GENERATOR_SYMBOLS.contains(c)));
    }

    #[test]
    fn test_generator_zero_length() {
        let generator = PasswordGenerator {
            length: 0,
            ..PasswordGenerator::default()
        };
        assert!(generator.generate().is_err());
    }
}
