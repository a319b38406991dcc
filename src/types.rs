// =============================================================================
// Shared types used across the funding sentinel
// =============================================================================

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::RuleError;

/// Comparison operator applied to a fetched funding rate.
///
/// Serialises to the same symbolic form users type (`>`, `>=`, `<`, `<=`, `=`)
/// so the persisted alerts document stays human-readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "=")]
    Eq,
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gt => write!(f, ">"),
            Self::Gte => write!(f, ">="),
            Self::Lt => write!(f, "<"),
            Self::Lte => write!(f, "<="),
            Self::Eq => write!(f, "="),
        }
    }
}

impl std::str::FromStr for Operator {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            ">" => Ok(Self::Gt),
            ">=" => Ok(Self::Gte),
            "<" => Ok(Self::Lt),
            "<=" => Ok(Self::Lte),
            "=" => Ok(Self::Eq),
            other => Err(RuleError::InvalidOperator(other.to_string())),
        }
    }
}

/// A single user-defined threshold alert on one symbol's funding rate.
///
/// The threshold is expressed in percentage units (e.g. `0.01` means 0.01 %),
/// matching the units users see on the exchange funding page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub symbol: String,
    pub operator: Operator,
    pub threshold: f64,
}

impl AlertRule {
    pub fn new(symbol: impl Into<String>, operator: Operator, threshold: f64) -> Self {
        Self {
            symbol: symbol.into(),
            operator,
            threshold,
        }
    }
}

/// The full durable alert state: user id -> symbol -> rule.
pub type AlertBook = HashMap<String, HashMap<String, AlertRule>>;

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn operator_roundtrips_through_str() {
        for (text, op) in [
            (">", Operator::Gt),
            (">=", Operator::Gte),
            ("<", Operator::Lt),
            ("<=", Operator::Lte),
            ("=", Operator::Eq),
        ] {
            assert_eq!(Operator::from_str(text).unwrap(), op);
            assert_eq!(op.to_string(), text);
        }
    }

    #[test]
    fn operator_rejects_unknown_symbol() {
        assert!(matches!(
            Operator::from_str("!="),
            Err(RuleError::InvalidOperator(_))
        ));
    }

    #[test]
    fn operator_serialises_to_symbolic_form() {
        let json = serde_json::to_string(&Operator::Gte).unwrap();
        assert_eq!(json, r#"">=""#);
        let back: Operator = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Operator::Gte);
    }

    #[test]
    fn rule_roundtrips_through_json() {
        let rule = AlertRule::new("BTC/USDT", Operator::Gt, -0.01);
        let json = serde_json::to_string(&rule).unwrap();
        let back: AlertRule = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rule);
    }
}
