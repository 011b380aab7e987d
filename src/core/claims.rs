//! Claim extraction and oracle cross-check
//!
//! Identical hallucinations across samples have zero variance, so price
//! claims are checked against a reference regardless of how the variance
//! came out.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;

use crate::types::{Claims, FactCheck, FactCheckReason};

lazy_static! {
    /// `$1,234.56`, `$ 42`, `$3000`
    static ref PRICE_PATTERN: Regex =
        Regex::new(r"\$\s?((?:\d{1,3}(?:,\d{3})+|\d+)(?:\.\d+)?)").unwrap();

    /// EVM contract address
    static ref ADDRESS_PATTERN: Regex = Regex::new(r"0x[a-fA-F0-9]{40}").unwrap();
}

/// Regex-based claim extractor
#[derive(Debug, Default, Clone)]
pub struct ClaimExtractor;

impl ClaimExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, text: &str) -> Claims {
        self.extract_prices(text, |_| true)
    }

    /// Claims that later text cannot extend, plus whether a price at the
    /// very end of `text` was held back.
    ///
    /// `$3` followed by a not-yet-seen `,000` must not be judged as 3.
    pub fn extract_settled(&self, text: &str) -> (Claims, bool) {
        let mut pending = false;
        let claims = self.extract_prices(text, |end| {
            let open = text[end..].chars().all(|c| c == ',' || c == '.');
            pending |= open;
            !open
        });
        (claims, pending)
    }

    fn extract_prices(&self, text: &str, mut keep: impl FnMut(usize) -> bool) -> Claims {
        let prices = PRICE_PATTERN
            .captures_iter(text)
            .filter(|c| c.get(0).map_or(false, |m| keep(m.end())))
            .filter_map(|c| c.get(1))
            .filter_map(|m| m.as_str().replace(',', "").parse::<f64>().ok())
            .collect();
        let addresses = ADDRESS_PATTERN
            .find_iter(text)
            .map(|m| m.as_str().to_string())
            .collect();
        Claims { prices, addresses }
    }
}

/// Deterministic price reference
#[async_trait]
pub trait ReferenceOracle: Send + Sync {
    async fn price_of(&self, symbol: &str) -> Option<f64>;
}

/// Fixed price table
#[derive(Debug, Default, Clone)]
pub struct StaticOracle {
    prices: BTreeMap<String, f64>,
}

impl StaticOracle {
    pub fn new(prices: BTreeMap<String, f64>) -> Self {
        Self { prices }
    }

    pub fn with_price(mut self, symbol: impl Into<String>, price: f64) -> Self {
        self.prices.insert(symbol.into(), price);
        self
    }
}

#[async_trait]
impl ReferenceOracle for StaticOracle {
    async fn price_of(&self, symbol: &str) -> Option<f64> {
        self.prices.get(symbol).copied()
    }
}

/// Validates claims against an oracle
#[derive(Debug, Clone)]
pub struct CrossChecker {
    symbol: String,
    tolerance: f64,
}

impl CrossChecker {
    pub fn new(symbol: impl Into<String>, tolerance: f64) -> Self {
        Self {
            symbol: symbol.into(),
            tolerance,
        }
    }

    /// Check every price claim; fails closed when no reference exists
    pub async fn validate(&self, claims: &Claims, oracle: Option<&dyn ReferenceOracle>) -> FactCheck {
        if claims.is_empty() {
            return FactCheck::new(FactCheckReason::R601_NO_CLAIMS, "no claims to check");
        }

        for &price in &claims.prices {
            let reference = match oracle {
                Some(oracle) => oracle.price_of(&self.symbol).await,
                None => None,
            };
            let Some(reference) = reference.filter(|r| r.is_finite() && *r > 0.0) else {
                return FactCheck::new(
                    FactCheckReason::R603_ORACLE_BLIND_SPOT,
                    format!("oracle cannot verify claim ${price} for {}", self.symbol),
                );
            };

            let drift = (price - reference).abs() / reference;
            if drift > self.tolerance {
                return FactCheck::new(
                    FactCheckReason::R604_FACTUAL_DRIFT,
                    format!(
                        "reported ${price}, oracle reports ${reference} ({:.2}% error)",
                        drift * 100.0
                    ),
                );
            }
        }

        FactCheck::new(
            FactCheckReason::R602_FACT_VALIDATED,
            format!(
                "{} price(s) validated, {} address(es) noted",
                claims.prices.len(),
                claims.addresses.len()
            ),
        )
    }
}

/// Extractor, checker and oracle wired together for one text
#[derive(Clone)]
pub struct FactGuard {
    extractor: ClaimExtractor,
    checker: CrossChecker,
    oracle: Option<Arc<dyn ReferenceOracle>>,
}

impl FactGuard {
    pub fn new(checker: CrossChecker, oracle: Option<Arc<dyn ReferenceOracle>>) -> Self {
        Self {
            extractor: ClaimExtractor::new(),
            checker,
            oracle,
        }
    }

    pub async fn check(&self, text: &str) -> FactCheck {
        let claims = self.extractor.extract(text);
        self.checker.validate(&claims, self.oracle.as_deref()).await
    }

    /// Check only claims that are complete; the flag reports a price still
    /// open at the end of `text`
    pub async fn check_settled(&self, text: &str) -> (FactCheck, bool) {
        let (claims, pending) = self.extractor.extract_settled(text);
        (self.checker.validate(&claims, self.oracle.as_deref()).await, pending)
    }
}
