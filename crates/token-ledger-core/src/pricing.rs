//! Pricing engine: package catalog and custom-quantity quotes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{Amount, LedgerError, OrganizationId, Result, DEFAULT_CURRENCY};

/// A sellable token bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPackage {
    /// Stable package identifier (e.g. `"starter-10k"`).
    pub id: String,

    /// Display name.
    pub name: String,

    /// Tokens in the bundle.
    pub token_quantity: i64,

    /// Per-token price for the bundle.
    pub price_per_token: Amount,

    /// Whether the package can currently be purchased.
    pub active: bool,
}

/// A computed price for a prospective purchase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceQuote {
    /// Tokens being priced.
    pub token_quantity: i64,

    /// Effective per-token price.
    pub price_per_token: Amount,

    /// `token_quantity * price_per_token`.
    pub total_amount: Amount,

    /// ISO currency code.
    pub currency: String,

    /// Package used, if the quote came from the catalog.
    pub package_id: Option<String>,
}

/// Pricing configuration: the package catalog, the default custom-quantity
/// rate, and per-organization rate overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Sellable packages.
    pub packages: Vec<TokenPackage>,

    /// Per-token price for custom quantities when no override applies.
    pub default_price_per_token: Amount,

    /// Negotiated per-token rates by organization. Overrides the default
    /// for custom-quantity quotes; package prices are fixed by the catalog.
    pub organization_rates: HashMap<OrganizationId, Amount>,

    /// Currency all catalog prices are denominated in.
    pub currency: String,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            packages: vec![
                TokenPackage {
                    id: "starter-1k".into(),
                    name: "Starter (1,000 tokens)".into(),
                    token_quantity: 1_000,
                    price_per_token: Amount::from_minor(2),
                    active: true,
                },
                TokenPackage {
                    id: "growth-10k".into(),
                    name: "Growth (10,000 tokens)".into(),
                    token_quantity: 10_000,
                    price_per_token: Amount::from_minor(1),
                    active: true,
                },
                TokenPackage {
                    id: "scale-100k".into(),
                    name: "Scale (100,000 tokens)".into(),
                    token_quantity: 100_000,
                    price_per_token: Amount::from_minor(1),
                    active: true,
                },
            ],
            default_price_per_token: Amount::from_minor(2),
            organization_rates: HashMap::new(),
            currency: DEFAULT_CURRENCY.to_string(),
        }
    }
}

impl PricingConfig {
    /// Look up an active package.
    #[must_use]
    pub fn package(&self, package_id: &str) -> Option<&TokenPackage> {
        self.packages
            .iter()
            .find(|p| p.id == package_id && p.active)
    }

    /// Active packages, for listing.
    #[must_use]
    pub fn active_packages(&self) -> Vec<&TokenPackage> {
        self.packages.iter().filter(|p| p.active).collect()
    }

    /// The effective custom-quantity rate for an organization.
    #[must_use]
    pub fn rate_for(&self, organization_id: OrganizationId) -> Amount {
        self.organization_rates
            .get(&organization_id)
            .copied()
            .unwrap_or(self.default_price_per_token)
    }

    /// Price a purchase from either a package or a custom quantity.
    ///
    /// Exactly one of `package_id` / `custom_quantity` must be given.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Validation`] when neither or both selectors
    /// are given, the quantity is not positive, or the total overflows;
    /// [`LedgerError::NotFound`] for an unknown or inactive package.
    pub fn quote(
        &self,
        organization_id: OrganizationId,
        package_id: Option<&str>,
        custom_quantity: Option<i64>,
    ) -> Result<PriceQuote> {
        let (quantity, price_per_token, package_id) = match (package_id, custom_quantity) {
            (Some(id), None) => {
                let package = self.package(id).ok_or_else(|| LedgerError::NotFound {
                    entity: "package",
                    id: id.to_string(),
                })?;
                (
                    package.token_quantity,
                    package.price_per_token,
                    Some(package.id.clone()),
                )
            }
            (None, Some(quantity)) => (quantity, self.rate_for(organization_id), None),
            (Some(_), Some(_)) => {
                return Err(LedgerError::Validation(
                    "specify either package_id or custom_quantity, not both".into(),
                ))
            }
            (None, None) => {
                return Err(LedgerError::Validation(
                    "specify package_id or custom_quantity".into(),
                ))
            }
        };

        if quantity <= 0 {
            return Err(LedgerError::Validation(
                "token quantity must be positive".into(),
            ));
        }

        let total_amount = price_per_token
            .checked_mul(quantity)
            .ok_or_else(|| LedgerError::Validation("purchase total overflows".into()))?;

        Ok(PriceQuote {
            token_quantity: quantity,
            price_per_token,
            total_amount,
            currency: self.currency.clone(),
            package_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_from_package() {
        let config = PricingConfig::default();
        let quote = config
            .quote(OrganizationId::generate(), Some("growth-10k"), None)
            .unwrap();
        assert_eq!(quote.token_quantity, 10_000);
        assert_eq!(quote.total_amount, Amount::from_minor(10_000));
        assert_eq!(quote.package_id.as_deref(), Some("growth-10k"));
    }

    #[test]
    fn quote_from_custom_quantity_uses_org_rate() {
        let mut config = PricingConfig::default();
        let org = OrganizationId::generate();
        config
            .organization_rates
            .insert(org, Amount::from_minor(1));

        let quote = config.quote(org, None, Some(500)).unwrap();
        assert_eq!(quote.price_per_token, Amount::from_minor(1));
        assert_eq!(quote.total_amount, Amount::from_minor(500));

        // Other organizations pay the default rate.
        let other = config
            .quote(OrganizationId::generate(), None, Some(500))
            .unwrap();
        assert_eq!(other.total_amount, Amount::from_minor(1_000));
    }

    #[test]
    fn quote_requires_exactly_one_selector() {
        let config = PricingConfig::default();
        let org = OrganizationId::generate();
        assert!(matches!(
            config.quote(org, None, None),
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            config.quote(org, Some("growth-10k"), Some(5)),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn quote_rejects_unknown_package_and_bad_quantity() {
        let config = PricingConfig::default();
        let org = OrganizationId::generate();
        assert!(matches!(
            config.quote(org, Some("nope"), None),
            Err(LedgerError::NotFound { .. })
        ));
        assert!(matches!(
            config.quote(org, None, Some(0)),
            Err(LedgerError::Validation(_))
        ));
    }
}
