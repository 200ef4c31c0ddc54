use serde::{Deserialize, Serialize};

/// Loading applied to the base price for every adult beyond the first.
const ADDITIONAL_ADULT_FACTOR: f64 = 0.9;
/// Flat monthly add-on per child, low end of the range.
const CHILD_LOW: u32 = 89;
/// Flat monthly add-on per child, high end of the range.
const CHILD_HIGH: u32 = 189;
/// First age that falls outside the private plans we quote.
pub const MEDICARE_AGE: u32 = 65;

/// Age band used to look up the base single-adult premium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bracket {
    #[serde(rename = "child")]
    Child,
    #[serde(rename = "18-29")]
    Age18To29,
    #[serde(rename = "30-39")]
    Age30To39,
    #[serde(rename = "40-49")]
    Age40To49,
    #[serde(rename = "50-54")]
    Age50To54,
    #[serde(rename = "55-59")]
    Age55To59,
    #[serde(rename = "60-64")]
    Age60To64,
}

impl Bracket {
    /// Bracket for an age below the Medicare threshold.
    pub fn for_age(age: u32) -> Self {
        match age {
            0..=17 => Bracket::Child,
            18..=29 => Bracket::Age18To29,
            30..=39 => Bracket::Age30To39,
            40..=49 => Bracket::Age40To49,
            50..=54 => Bracket::Age50To54,
            55..=59 => Bracket::Age55To59,
            _ => Bracket::Age60To64,
        }
    }

    /// Base (low, high) monthly premium for a single adult in this band.
    pub fn base_prices(self) -> (u32, u32) {
        match self {
            Bracket::Child => (89, 189),
            Bracket::Age18To29 => (189, 389),
            Bracket::Age30To39 => (219, 449),
            Bracket::Age40To49 => (249, 519),
            Bracket::Age50To54 => (289, 619),
            Bracket::Age55To59 => (349, 719),
            Bracket::Age60To64 => (419, 849),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Bracket::Child => "child",
            Bracket::Age18To29 => "18-29",
            Bracket::Age30To39 => "30-39",
            Bracket::Age40To49 => "40-49",
            Bracket::Age50To54 => "50-54",
            Bracket::Age55To59 => "55-59",
            Bracket::Age60To64 => "60-64",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricedQuote {
    pub low_price: u32,
    pub high_price: u32,
    pub bracket: Bracket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicareQuote {
    pub is_medicare: bool,
}

/// Result of pricing a household.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QuoteResult {
    Priced(PricedQuote),
    Medicare(MedicareQuote),
}

impl QuoteResult {
    pub fn is_medicare(&self) -> bool {
        matches!(self, QuoteResult::Medicare(_))
    }

    pub fn priced(&self) -> Option<&PricedQuote> {
        match self {
            QuoteResult::Priced(quote) => Some(quote),
            QuoteResult::Medicare(_) => None,
        }
    }
}

/// Price a household from its composition and the youngest adult's age.
///
/// Uses additive loading on the youngest adult's band: each extra adult adds
/// `round(base * 0.9)` to both ends of the range and each child adds a flat
/// $89 / $189. An adult count of zero is priced as a single adult.
pub fn calculate_quote(adults: u32, kids: u32, youngest_age: u32) -> QuoteResult {
    if youngest_age >= MEDICARE_AGE {
        return QuoteResult::Medicare(MedicareQuote { is_medicare: true });
    }

    let bracket = Bracket::for_age(youngest_age);
    let (base_low, base_high) = bracket.base_prices();
    let extra_adults = adults.max(1) - 1;

    // Saturates instead of wrapping so absurd counts keep low <= high.
    let low_price = base_low
        .saturating_add(extra_adults.saturating_mul(load(base_low)))
        .saturating_add(kids.saturating_mul(CHILD_LOW));
    let high_price = base_high
        .saturating_add(extra_adults.saturating_mul(load(base_high)))
        .saturating_add(kids.saturating_mul(CHILD_HIGH));

    QuoteResult::Priced(PricedQuote {
        low_price,
        high_price,
        bracket,
    })
}

fn load(base: u32) -> u32 {
    (f64::from(base) * ADDITIONAL_ADULT_FACTOR).round() as u32
}
