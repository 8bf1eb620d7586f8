//! Core identifiers and the integer-fen money type shared across modules.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Vendor project identifier.
pub type ProjectId = u64;
/// Vendor session (a.k.a. "screen") identifier.
pub type SessionId = u64;
/// Vendor SKU (price tier) identifier.
pub type SkuId = u64;
/// Vendor order identifier, present once `CreateOrder` succeeds.
pub type OrderId = u64;

/// An amount of money in fen (1/100 yuan), the vendor's wire unit.
///
/// Arithmetic on `Fen` stays integer end to end; there is no `f64`
/// conversion anywhere in this crate (Testable Property 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fen(pub u64);

impl Fen {
    pub fn zero() -> Self {
        Fen(0)
    }

    pub fn checked_mul(self, count: u64) -> Option<Self> {
        self.0.checked_mul(count).map(Fen)
    }

    pub fn checked_add(self, other: Fen) -> Option<Self> {
        self.0.checked_add(other.0).map(Fen)
    }
}

impl fmt::Display for Fen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// The unified numeric result code every vendor call (or synthetic
/// transport event) is normalized into.
///
/// This is pure data: the FSM `match`es on it directly and never converts
/// it into a Rust `Error` type (Design Note 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VendorCode(pub i64);

impl VendorCode {
    pub const SUCCESS: VendorCode = VendorCode(0);
    /// Synthetic: transport failure, DNS/connect/timeout/non-2xx other than 412/429.
    pub const TRANSPORT_ERROR: VendorCode = VendorCode(114_514);
    /// Server reports overloaded; harmless, retry without widening back-off.
    pub const OVERLOADED: VendorCode = VendorCode(429);
    /// Prepare: risk challenge required.
    pub const RISK_REQUIRED: VendorCode = VendorCode(-401);
    /// RiskRegister: already solved elsewhere, treat as no-op success.
    pub const RISK_ALREADY_SOLVED: VendorCode = VendorCode(100_000);

    pub fn is_success(self) -> bool {
        self.0 == 0
    }

    pub fn is_token_stale_on_create(self) -> bool {
        (100_050..=100_059).contains(&self.0)
    }

    pub fn is_duplicate_unpaid(self) -> bool {
        matches!(self.0, 100_079 | 100_048)
    }

    pub fn is_out_of_stock(self) -> bool {
        matches!(self.0, 219 | 100_009)
    }

    pub fn is_fatal(self) -> bool {
        matches!(
            self.0,
            100_039 | 100_049 | 100_080 | 100_082 | 100_016 | 100_017 | 100_098
        )
    }

    pub fn is_price_drift(self) -> bool {
        self.0 == 100_034
    }

    pub fn is_missing_contact(self) -> bool {
        self.0 == 209_001
    }

    /// "ERR 3": the vendor suspects the identity is running multiple
    /// concurrent scripts. Not a Non-goal violation to handle — the
    /// Non-goal excludes *scaling past one identity*, not *reacting
    /// correctly when the vendor thinks you have*.
    pub fn is_err3(self) -> bool {
        self.0 == 3
    }
}

impl fmt::Display for VendorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fen_display_formats_as_yuan_and_cents() {
        assert_eq!(Fen(19900).to_string(), "199.00");
        assert_eq!(Fen(5).to_string(), "0.05");
    }

    #[test]
    fn vendor_code_classifies_token_stale_range() {
        assert!(VendorCode(100_050).is_token_stale_on_create());
        assert!(VendorCode(100_059).is_token_stale_on_create());
        assert!(!VendorCode(100_060).is_token_stale_on_create());
        assert!(!VendorCode(100_049).is_token_stale_on_create());
    }

    #[test]
    fn vendor_code_classifies_fatal_set() {
        for code in [100_039, 100_049, 100_080, 100_082, 100_016, 100_017, 100_098] {
            assert!(VendorCode(code).is_fatal(), "{code} should be fatal");
        }
        assert!(!VendorCode(0).is_fatal());
        assert!(!VendorCode(209_001).is_fatal());
    }
}
