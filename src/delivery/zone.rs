use std::collections::BTreeMap;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use thiserror::Error;

/// Loose UK postcode: outward code, optional space, inward code.
static POSTCODE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[A-Z]{1,2}[0-9][A-Z0-9]? ?[0-9][A-Z]{2}").expect("postcode pattern is valid")
});

/// Outward-code prefixes checked in order. A digit must follow the letters,
/// so `N` and `NW` never shadow each other, and `EC1A` matches nothing.
static ZONE_RULES: Lazy<Vec<(Regex, Zone)>> = Lazy::new(|| {
    [
        (r"^SW[0-9]", Zone::SW),
        (r"^E[0-9]", Zone::E),
        (r"^W[0-9]", Zone::W),
        (r"^N[0-9]", Zone::N),
        (r"^NW[0-9]", Zone::NW),
        (r"^SE[0-9]", Zone::SE),
    ]
    .into_iter()
    .map(|(pattern, zone)| (Regex::new(pattern).expect("zone pattern is valid"), zone))
    .collect()
});

/// Delivery zones keyed on London postcode areas.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[strum(ascii_case_insensitive)]
pub enum Zone {
    SW,
    E,
    W,
    N,
    NW,
    SE,
    /// Outside the serviceable area.
    #[strum(serialize = "DEFAULT")]
    #[serde(rename = "DEFAULT")]
    Default,
}

impl Zone {
    pub fn is_serviceable(self) -> bool {
        self != Zone::Default
    }
}

/// Pulls the first postcode-looking substring out of free text, upper-cased.
pub fn extract_postcode(text: &str) -> Option<String> {
    POSTCODE_PATTERN
        .find(text)
        .map(|found| found.as_str().to_ascii_uppercase())
}

/// Maps an already extracted postcode to its zone.
pub fn zone_for_postcode(postcode: &str) -> Zone {
    ZONE_RULES
        .iter()
        .find(|(rule, _)| rule.is_match(postcode))
        .map(|(_, zone)| *zone)
        .unwrap_or(Zone::Default)
}

/// Classifies a raw address or postcode. Never fails; unknown input is `Default`.
pub fn classify(raw: &str) -> Zone {
    extract_postcode(raw)
        .map(|postcode| zone_for_postcode(&postcode))
        .unwrap_or(Zone::Default)
}

/// Static price and transit time for one zone, excluding preparation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneRate {
    #[serde(with = "rust_decimal::serde::float")]
    pub cost: Decimal,
    pub time_minutes: u32,
}

impl ZoneRate {
    pub const fn new(cost: Decimal, time_minutes: u32) -> Self {
        Self { cost, time_minutes }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ZoneTableError {
    #[error("zone table is missing a rate for {0}")]
    MissingZone(Zone),
    #[error("unknown zone name: {0}")]
    UnknownZone(String),
    #[error("zone {0} has a negative cost")]
    NegativeCost(Zone),
}

/// Immutable zone → rate mapping with exactly one entry per zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneTable {
    rates: BTreeMap<Zone, ZoneRate>,
}

impl ZoneTable {
    pub fn new(rates: BTreeMap<Zone, ZoneRate>) -> Result<Self, ZoneTableError> {
        for zone in Zone::iter() {
            match rates.get(&zone) {
                None => return Err(ZoneTableError::MissingZone(zone)),
                Some(rate) if rate.cost.is_sign_negative() => {
                    return Err(ZoneTableError::NegativeCost(zone))
                }
                Some(_) => {}
            }
        }
        Ok(Self { rates })
    }

    /// Builds a table from configuration keys such as `"SW"` or `"default"`.
    pub fn from_named<'a, I>(entries: I) -> Result<Self, ZoneTableError>
    where
        I: IntoIterator<Item = (&'a str, ZoneRate)>,
    {
        let mut rates = BTreeMap::new();
        for (name, rate) in entries {
            let zone = Zone::from_str(name.trim())
                .map_err(|_| ZoneTableError::UnknownZone(name.to_string()))?;
            rates.insert(zone, rate);
        }
        Self::new(rates)
    }

    /// The restaurant's London table.
    pub fn london() -> Self {
        let rates = BTreeMap::from([
            (Zone::SW, ZoneRate::new(dec!(4), 15)),
            (Zone::E, ZoneRate::new(dec!(6), 25)),
            (Zone::W, ZoneRate::new(dec!(6), 25)),
            (Zone::N, ZoneRate::new(dec!(6), 25)),
            (Zone::NW, ZoneRate::new(dec!(7), 30)),
            (Zone::SE, ZoneRate::new(dec!(7), 30)),
            (Zone::Default, ZoneRate::new(dec!(9), 45)),
        ]);
        Self { rates }
    }

    /// Rate for a zone that can be delivered to. `Default` never yields one.
    pub fn serviceable_rate(&self, zone: Zone) -> Option<ZoneRate> {
        if !zone.is_serviceable() {
            return None;
        }
        self.rates.get(&zone).copied()
    }
}

impl Default for ZoneTable {
    fn default() -> Self {
        Self::london()
    }
}
