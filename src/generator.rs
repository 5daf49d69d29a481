//! Password generation and strength scoring.
//!
//! Generated passwords come straight from the OS RNG (`getrandom`) with
//! rejection sampling, so every character of the pool is equally likely.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{Result, VaultError};

pub const MIN_PASSWORD_LENGTH: usize = 4;
pub const DEFAULT_PASSWORD_LENGTH: usize = 16;
pub const DEFAULT_SYMBOLS: &str = "!@#$%^&*()_+-=[]{}|;:,.<>?";
/// Symbols the "at least one symbol" guarantee draws from.
const REQUIRED_SYMBOLS: &str = "!@#$%^&*";
/// Characters easily confused with one another in print.
pub const AMBIGUOUS_CHARS: &str = "loIO01|";

const LOWERCASE: &str = "abcdefghijklmnopqrstuvwxyz";
const UPPERCASE: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &str = "0123456789";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordPolicy {
    pub length: usize,
    pub lowercase: bool,
    pub uppercase: bool,
    pub digits: bool,
    pub symbols: bool,
    pub exclude_ambiguous: bool,
    /// Replaces the default symbol set when non-empty. Not filtered for
    /// ambiguity.
    pub custom_symbols: Option<String>,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            length: DEFAULT_PASSWORD_LENGTH,
            lowercase: true,
            uppercase: true,
            digits: true,
            symbols: true,
            exclude_ambiguous: true,
            custom_symbols: None,
        }
    }
}

impl PasswordPolicy {
    fn custom_symbols(&self) -> Option<&str> {
        self.custom_symbols.as_deref().filter(|s| !s.is_empty())
    }

    /// One character class per selected option, after ambiguity filtering.
    fn classes(&self) -> Vec<Vec<char>> {
        let filter = |set: &str| -> Vec<char> {
            set.chars()
                .filter(|c| !(self.exclude_ambiguous && AMBIGUOUS_CHARS.contains(*c)))
                .collect()
        };
        let mut classes = Vec::new();
        if self.lowercase {
            classes.push(filter(LOWERCASE));
        }
        if self.uppercase {
            classes.push(filter(UPPERCASE));
        }
        if self.digits {
            classes.push(filter(DIGITS));
        }
        if self.symbols {
            match self.custom_symbols() {
                Some(custom) => classes.push(custom.chars().collect()),
                None => classes.push(filter(DEFAULT_SYMBOLS)),
            }
        }
        classes
    }

    fn required_symbols(&self) -> Vec<char> {
        self.custom_symbols()
            .unwrap_or(REQUIRED_SYMBOLS)
            .chars()
            .collect()
    }
}

fn random_u32() -> Result<u32> {
    let mut buf = [0u8; 4];
    getrandom::getrandom(&mut buf)
        .map_err(|e| VaultError::Encryption(format!("OS RNG unavailable: {}", e)))?;
    Ok(u32::from_le_bytes(buf))
}

/// Uniform index in `0..bound` by rejection sampling.
fn random_index(bound: usize) -> Result<usize> {
    let bound = u32::try_from(bound)
        .map_err(|_| VaultError::InvalidArgument("character pool too large".to_string()))?;
    if bound == 0 {
        return Err(VaultError::InvalidArgument(
            "cannot pick from an empty set".to_string(),
        ));
    }
    let zone = u32::MAX - (u32::MAX % bound);
    loop {
        let value = random_u32()?;
        if value < zone {
            return Ok((value % bound) as usize);
        }
    }
}

fn pick(set: &[char]) -> Result<char> {
    Ok(set[random_index(set.len())?])
}

/// Generate a password satisfying `policy`: at least one character of each
/// selected class, the rest drawn from the union of the classes.
pub fn generate_password(policy: &PasswordPolicy) -> Result<Zeroizing<String>> {
    if policy.length < MIN_PASSWORD_LENGTH {
        return Err(VaultError::InvalidArgument(format!(
            "password length must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    let classes = policy.classes();
    let pool: Vec<char> = classes.iter().flatten().copied().collect();
    if pool.is_empty() {
        return Err(VaultError::InvalidArgument(
            "at least one character type must be selected".to_string(),
        ));
    }

    let mut chars = Zeroizing::new(Vec::with_capacity(policy.length));
    let mut required: Vec<&[char]> = classes[..classes.len() - usize::from(policy.symbols)]
        .iter()
        .map(Vec::as_slice)
        .collect();
    let required_symbols = policy.required_symbols();
    if policy.symbols {
        required.push(&required_symbols);
    }
    for set in required {
        chars.push(pick(set)?);
    }
    while chars.len() < policy.length {
        chars.push(pick(&pool)?);
    }

    // Fisher-Yates so the required characters land anywhere.
    for i in (1..chars.len()).rev() {
        let j = random_index(i + 1)?;
        chars.swap(i, j);
    }
    Ok(Zeroizing::new(chars.iter().collect()))
}

// ============================================================================
// Strength
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Strength {
    VeryWeak,
    Weak,
    Medium,
    Strong,
    VeryStrong,
}

impl Strength {
    pub fn from_score(score: i32) -> Self {
        match score {
            s if s >= 80 => Self::VeryStrong,
            s if s >= 60 => Self::Strong,
            s if s >= 40 => Self::Medium,
            s if s >= 20 => Self::Weak,
            _ => Self::VeryWeak,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::VeryWeak => "Very Weak",
            Self::Weak => "Weak",
            Self::Medium => "Medium",
            Self::Strong => "Strong",
            Self::VeryStrong => "Very Strong",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrengthReport {
    pub score: i32,
    pub strength: Strength,
    pub feedback: Vec<&'static str>,
    pub length: usize,
    pub has_lowercase: bool,
    pub has_uppercase: bool,
    pub has_digits: bool,
    pub has_symbols: bool,
}

struct Patterns {
    lowercase: Regex,
    uppercase: Regex,
    digits: Regex,
    symbols: Regex,
    sequential_digits: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        lowercase: Regex::new(r"[a-z]").expect("static pattern"),
        uppercase: Regex::new(r"[A-Z]").expect("static pattern"),
        digits: Regex::new(r"[0-9]").expect("static pattern"),
        symbols: Regex::new(r#"[!@#$%^&*(),.?":{}|<>]"#).expect("static pattern"),
        sequential_digits: Regex::new(r"012|123|234|345|456|567|678|789|890")
            .expect("static pattern"),
    })
}

/// Three or more of the same character in a row. Line breaks don't count.
fn has_repeated_run(password: &str) -> bool {
    let chars: Vec<char> = password.chars().collect();
    chars
        .windows(3)
        .any(|w| w[0] != '\n' && w[0] == w[1] && w[1] == w[2])
}

pub fn check_strength(password: &str) -> StrengthReport {
    let p = patterns();
    let length = password.chars().count();
    let mut report = StrengthReport {
        score: 0,
        strength: Strength::VeryWeak,
        feedback: Vec::new(),
        length,
        has_lowercase: p.lowercase.is_match(password),
        has_uppercase: p.uppercase.is_match(password),
        has_digits: p.digits.is_match(password),
        has_symbols: p.symbols.is_match(password),
    };

    if length >= 12 {
        report.score += 25;
    } else if length >= 8 {
        report.score += 15;
    } else {
        report.feedback.push("Use at least 8 characters");
    }

    let classes = [
        (report.has_lowercase, 15, "Add lowercase letters"),
        (report.has_uppercase, 15, "Add uppercase letters"),
        (report.has_digits, 15, "Add numbers"),
        (report.has_symbols, 20, "Add special characters"),
    ];
    for (present, points, hint) in classes {
        if present {
            report.score += points;
        } else {
            report.feedback.push(hint);
        }
    }

    if length >= 16 {
        report.score += 10;
    }
    if has_repeated_run(password) {
        report.score -= 10;
        report.feedback.push("Avoid repeated characters");
    }
    if p.sequential_digits.is_match(password) {
        report.score -= 10;
        report.feedback.push("Avoid sequential numbers");
    }

    report.strength = Strength::from_score(report.score);
    report
}
