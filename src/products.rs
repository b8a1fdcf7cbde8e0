//! Product catalog: the purchasable premium periods and inquiry packages.

use serde::{Deserialize, Serialize};

use crate::premium::{PeriodClass, PolicyError, QUARTER_DAYS};
use crate::profiles::ProfileVariant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductReference {
    Premium,
    Inquiries,
}

impl ProductReference {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductReference::Premium => "PREMIUM",
            ProductReference::Inquiries => "INQUIRIES",
        }
    }
}

/// Which profile variants may buy a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductAudience {
    Any,
    Player,
    Guest,
    /// Everyone except players and guests.
    Other,
}

impl ProductAudience {
    pub fn admits(&self, variant: ProfileVariant) -> bool {
        match self {
            ProductAudience::Any => true,
            ProductAudience::Player => variant == ProfileVariant::Player,
            ProductAudience::Guest => variant == ProfileVariant::Guest,
            ProductAudience::Other => {
                !matches!(variant, ProfileVariant::Player | ProfileVariant::Guest)
            }
        }
    }
}

/// What a successful purchase does to the buyer's entitlements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProductEffect {
    Premium(PeriodClass),
    Inquiries { bonus_count: i64 },
}

/// key: product-catalog-entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: i32,
    pub name: String,
    pub readable_name: String,
    /// Price in minor currency units.
    pub price_minor: i64,
    pub reference: ProductReference,
    pub visible: bool,
    pub audience: ProductAudience,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bonus_count: Option<i64>,
}

impl Product {
    /// Premium period implied by the product name.
    pub fn period_class(&self) -> PeriodClass {
        if self.name.ends_with("_YEAR") {
            PeriodClass::Year
        } else if self.name.ends_with("_QUARTER") {
            PeriodClass::Custom(QUARTER_DAYS)
        } else {
            PeriodClass::Month
        }
    }

    pub fn effect(&self) -> ProductEffect {
        match self.reference {
            ProductReference::Premium => ProductEffect::Premium(self.period_class()),
            ProductReference::Inquiries => ProductEffect::Inquiries {
                bonus_count: self.bonus_count.unwrap_or(0),
            },
        }
    }

    pub fn ensure_available_to(&self, variant: ProfileVariant) -> Result<(), PolicyError> {
        if self.audience.admits(variant) {
            Ok(())
        } else {
            Err(PolicyError::ProductNotForVariant {
                product: self.name.clone(),
                variant,
            })
        }
    }

    /// Price formatted the way the provider expects it, e.g. `29.99`.
    pub fn price_string(&self) -> String {
        format_minor(self.price_minor)
    }
}

pub fn format_minor(amount: i64) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let amount = amount.abs();
    format!("{sign}{}.{:02}", amount / 100, amount % 100)
}

/// Parse a decimal amount such as `29.99`, `99` or `99.0` into minor units.
/// Only ASCII digits are accepted on either side of the dot; signs, blanks
/// inside the number and amounts that overflow `i64` are rejected.
pub fn parse_minor(value: &str) -> Option<i64> {
    let value = value.trim();
    let (whole, fraction) = match value.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (value, ""),
    };
    let digits = |part: &str| part.bytes().all(|byte| byte.is_ascii_digit());
    if whole.is_empty() || fraction.len() > 2 || !digits(whole) || !digits(fraction) {
        return None;
    }
    let whole: i64 = whole.parse().ok()?;
    let fraction: i64 = match fraction.len() {
        0 => 0,
        1 => fraction.parse::<i64>().ok()? * 10,
        _ => fraction.parse().ok()?,
    };
    whole.checked_mul(100)?.checked_add(fraction)
}

/// key: product-catalog -> immutable reference data
#[derive(Debug, Clone)]
pub struct ProductCatalog {
    products: Vec<Product>,
}

impl ProductCatalog {
    pub fn new(products: Vec<Product>) -> Self {
        Self { products }
    }

    /// The production lineup.
    pub fn standard() -> Self {
        let premium = |id, name: &str, readable: &str, price, visible, audience| Product {
            id,
            name: name.to_string(),
            readable_name: readable.to_string(),
            price_minor: price,
            reference: ProductReference::Premium,
            visible,
            audience,
            bonus_count: None,
        };
        let package = |id, name: &str, readable: &str, price, bonus| Product {
            id,
            name: name.to_string(),
            readable_name: readable.to_string(),
            price_minor: price,
            reference: ProductReference::Inquiries,
            visible: true,
            audience: ProductAudience::Any,
            bonus_count: Some(bonus),
        };

        Self::new(vec![
            premium(1, "PLAYER_PREMIUM_PROFILE_MONTH", "Monthly premium player profile", 2999, true, ProductAudience::Player),
            premium(2, "PLAYER_PREMIUM_PROFILE_YEAR", "Yearly premium player profile", 9900, true, ProductAudience::Player),
            premium(3, "GUEST_PREMIUM_PROFILE_MONTH", "Monthly premium profile", 2999, true, ProductAudience::Guest),
            premium(4, "GUEST_PREMIUM_PROFILE_YEAR", "Yearly premium profile", 9900, true, ProductAudience::Guest),
            premium(5, "OTHER_PREMIUM_PROFILE_QUARTER", "Quarterly premium profile", 29900, true, ProductAudience::Other),
            premium(6, "OTHER_PREMIUM_PROFILE_YEAR", "Yearly premium profile", 39900, true, ProductAudience::Other),
            premium(7, "PREMIUM_PROFILE_MONTH", "Monthly premium profile", 2999, false, ProductAudience::Any),
            premium(8, "PREMIUM_PROFILE_YEAR", "Yearly premium profile", 9999, false, ProductAudience::Any),
            package(9, "PREMIUM_INQUIRIES_L", "Inquiry package L", 999, 3),
            package(10, "PREMIUM_INQUIRIES_XL", "Inquiry package XL", 1499, 5),
            package(11, "PREMIUM_INQUIRIES_XXL", "Inquiry package XXL", 2499, 10),
        ])
    }

    pub fn get(&self, id: i32) -> Option<&Product> {
        self.products.iter().find(|product| product.id == id)
    }

    pub fn by_name(&self, name: &str) -> Option<&Product> {
        self.products.iter().find(|product| product.name == name)
    }

    pub fn visible(&self) -> impl Iterator<Item = &Product> {
        self.products.iter().filter(|product| product.visible)
    }

    pub fn visible_by_reference(&self, reference: ProductReference) -> Vec<&Product> {
        self.visible()
            .filter(|product| product.reference == reference)
            .collect()
    }
}

impl Default for ProductCatalog {
    fn default() -> Self {
        Self::standard()
    }
}
