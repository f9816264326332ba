//! Per-country fee schedule and the fee calculator.
//!
//! The schedule is a static lookup table; the calculator is a pure function
//! of the schedule entry and the applicant count.

use bigdecimal::BigDecimal;

/// Fee schedule entry for one passport country
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeEntry {
    pub country: &'static str,
    pub visa_fee: i64,
    pub service_fee: i64,
    pub currency: &'static str,
}

/// Passport countries currently accepted, with their fees.
const FEE_SCHEDULE: &[FeeEntry] = &[
    FeeEntry { country: "NG", visa_fee: 49, service_fee: 35, currency: "USD" },
    FeeEntry { country: "GH", visa_fee: 49, service_fee: 35, currency: "USD" },
    FeeEntry { country: "KE", visa_fee: 52, service_fee: 35, currency: "USD" },
    FeeEntry { country: "ZA", visa_fee: 44, service_fee: 35, currency: "USD" },
    FeeEntry { country: "EG", visa_fee: 49, service_fee: 35, currency: "USD" },
    FeeEntry { country: "IN", visa_fee: 59, service_fee: 35, currency: "USD" },
    FeeEntry { country: "PK", visa_fee: 59, service_fee: 35, currency: "USD" },
    FeeEntry { country: "BD", visa_fee: 59, service_fee: 35, currency: "USD" },
    FeeEntry { country: "PH", visa_fee: 49, service_fee: 35, currency: "USD" },
    FeeEntry { country: "VN", visa_fee: 49, service_fee: 35, currency: "USD" },
];

/// Look up the fee entry for a passport country, case-insensitively.
pub fn lookup(country: &str) -> Option<&'static FeeEntry> {
    let needle = country.trim().to_uppercase();
    FEE_SCHEDULE.iter().find(|entry| entry.country == needle)
}

pub fn is_supported(country: &str) -> bool {
    lookup(country).is_some()
}

/// Total fee for an application:
/// `(visa_fee + service_fee) × (1 + additional_applicant_count)`.
pub fn total_fee(
    visa_fee: &BigDecimal,
    service_fee: &BigDecimal,
    additional_applicants: usize,
) -> BigDecimal {
    let applicants = BigDecimal::from(1 + additional_applicants as u64);
    (visa_fee + service_fee) * applicants
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_countries_resolve_case_insensitively() {
        assert!(is_supported("NG"));
        assert!(is_supported("ng"));
        assert!(is_supported(" ke "));
        assert!(!is_supported("XX"));
    }

    #[test]
    fn fee_formula_matches_reference_case() {
        // visaFee=49, serviceFee=35, 2 additional applicants -> 252
        let total = total_fee(&BigDecimal::from(49), &BigDecimal::from(35), 2);
        assert_eq!(total, BigDecimal::from(252));
    }

    #[test]
    fn single_applicant_pays_base_fee() {
        let total = total_fee(&BigDecimal::from(49), &BigDecimal::from(35), 0);
        assert_eq!(total, BigDecimal::from(84));
    }

    #[test]
    fn schedule_lookup_returns_fees() {
        let entry = lookup("NG").expect("NG should be in the schedule");
        assert_eq!(entry.visa_fee, 49);
        assert_eq!(entry.service_fee, 35);
        assert_eq!(entry.currency, "USD");
    }
}
