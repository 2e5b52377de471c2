//! Rail catalog
//!
//! Static per-rail configuration: priority, timing, fee model, amount bounds,
//! country eligibility and protocol preferences. Pure data, versioned only by
//! redeploying.

use crate::types::{Protocol, Rail};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Country used when neither an explicit country nor a known currency is given
pub const DEFAULT_COUNTRY: &str = "US";

/// Catalog entry for a single rail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RailDescriptor {
    /// Rail
    pub rail: Rail,

    /// Lower is preferred
    pub priority: u32,

    /// Typical time to settlement
    pub estimated_settlement_seconds: u64,

    /// Percentage fee as a fraction (0.007 = 0.7%)
    pub fee_percentage: Decimal,

    /// Fixed fee per transfer
    pub fee_fixed: Decimal,

    /// Smallest accepted amount
    pub min_amount: Decimal,

    /// Largest accepted amount
    pub max_amount: Decimal,

    /// Whether the rail is offered at all
    pub supported: bool,
}

impl RailDescriptor {
    /// Whether `amount` fits `[min_amount, max_amount]`
    pub fn admits(&self, amount: Decimal) -> bool {
        amount >= self.min_amount && amount <= self.max_amount
    }
}

/// Rail-specific connection settings, one variant per rail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rail", rename_all = "snake_case")]
pub enum RailSettings {
    /// Stablecoin transfers
    CircleUsdc {
        /// Chain the transfer is sent on
        chain: String,
        /// Confirmations before the transfer counts as final
        confirmations: u32,
    },
    /// Pix
    Pix {
        /// ISPB of the settling participant
        ispb: String,
    },
    /// SPEI
    Spei {
        /// CLABE prefix of the sending participant
        clabe_prefix: String,
    },
    /// Visa Direct
    VisaDirect {
        /// Acquiring BIN
        acquiring_bin: String,
    },
    /// Mastercard Send
    MastercardSend {
        /// Interbank card association number
        ica: String,
    },
    /// ACH
    Ach {
        /// Originating depository routing number
        odfi_routing: String,
        /// Submit to same-day ACH windows
        same_day: bool,
    },
    /// Wire
    Wire {
        /// Sending BIC
        bic: String,
        /// `fedwire` or `swift`
        network: String,
    },
    /// SEPA
    Sepa {
        /// Use SEPA Instant when the beneficiary bank supports it
        instant: bool,
    },
}

impl RailSettings {
    /// Rail this variant configures
    pub fn rail(&self) -> Rail {
        match self {
            RailSettings::CircleUsdc { .. } => Rail::CircleUsdc,
            RailSettings::Pix { .. } => Rail::Pix,
            RailSettings::Spei { .. } => Rail::Spei,
            RailSettings::VisaDirect { .. } => Rail::VisaDirect,
            RailSettings::MastercardSend { .. } => Rail::MastercardSend,
            RailSettings::Ach { .. } => Rail::Ach,
            RailSettings::Wire { .. } => Rail::Wire,
            RailSettings::Sepa { .. } => Rail::Sepa,
        }
    }

    /// Whether a successful submission still awaits rail-side completion
    pub fn settles_async(&self) -> bool {
        match self {
            RailSettings::CircleUsdc { confirmations, .. } => *confirmations > 0,
            RailSettings::Ach { .. } | RailSettings::Wire { .. } => true,
            RailSettings::Sepa { instant } => !instant,
            RailSettings::Pix { .. }
            | RailSettings::Spei { .. }
            | RailSettings::VisaDirect { .. }
            | RailSettings::MastercardSend { .. } => false,
        }
    }

    /// Built-in settings for a rail
    pub fn default_for(rail: Rail) -> Self {
        match rail {
            Rail::CircleUsdc => RailSettings::CircleUsdc {
                chain: "base".to_string(),
                confirmations: 1,
            },
            Rail::Pix => RailSettings::Pix {
                ispb: "00000000".to_string(),
            },
            Rail::Spei => RailSettings::Spei {
                clabe_prefix: "646".to_string(),
            },
            Rail::VisaDirect => RailSettings::VisaDirect {
                acquiring_bin: "400000".to_string(),
            },
            Rail::MastercardSend => RailSettings::MastercardSend {
                ica: "0000".to_string(),
            },
            Rail::Ach => RailSettings::Ach {
                odfi_routing: "000000000".to_string(),
                same_day: true,
            },
            Rail::Wire => RailSettings::Wire {
                bic: "XXXXUS33".to_string(),
                network: "fedwire".to_string(),
            },
            Rail::Sepa => RailSettings::Sepa { instant: false },
        }
    }
}

/// Partial override of a catalog entry, loaded from configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RailOverride {
    /// Rail to override
    pub rail: Option<Rail>,
    /// Priority
    pub priority: Option<u32>,
    /// Percentage fee fraction
    pub fee_percentage: Option<Decimal>,
    /// Fixed fee
    pub fee_fixed: Option<Decimal>,
    /// Minimum amount
    pub min_amount: Option<Decimal>,
    /// Maximum amount
    pub max_amount: Option<Decimal>,
    /// Supported flag
    pub supported: Option<bool>,
    /// Connection settings
    pub settings: Option<RailSettings>,
}

/// The rail catalog
#[derive(Debug, Clone)]
pub struct RailCatalog {
    descriptors: BTreeMap<Rail, RailDescriptor>,
    settings: BTreeMap<Rail, RailSettings>,
    country_rails: HashMap<String, Vec<Rail>>,
    universal_rails: Vec<Rail>,
    currency_country: HashMap<String, String>,
    preferences: HashMap<Protocol, Vec<Rail>>,
}

fn descriptor(
    rail: Rail,
    priority: u32,
    estimated_settlement_seconds: u64,
    fee_percentage: Decimal,
    fee_fixed: Decimal,
    min_amount: Decimal,
    max_amount: Decimal,
) -> RailDescriptor {
    RailDescriptor {
        rail,
        priority,
        estimated_settlement_seconds,
        fee_percentage,
        fee_fixed,
        min_amount,
        max_amount,
        supported: true,
    }
}

impl Default for RailCatalog {
    fn default() -> Self {
        let d = Decimal::new;
        let descriptors = [
            descriptor(Rail::CircleUsdc, 1, 60, d(1, 3), d(0, 0), d(1, 2), d(10_000_000, 0)),
            descriptor(Rail::Pix, 1, 10, d(7, 3), d(0, 0), d(1, 2), d(1_000_000, 0)),
            descriptor(Rail::Spei, 1, 30, d(5, 3), d(0, 0), d(1, 2), d(1_000_000, 0)),
            descriptor(Rail::VisaDirect, 2, 30, d(15, 3), d(25, 2), d(1, 0), d(50_000, 0)),
            descriptor(Rail::MastercardSend, 2, 30, d(15, 3), d(25, 2), d(1, 0), d(50_000, 0)),
            descriptor(Rail::Sepa, 2, 14_400, d(2, 3), d(20, 2), d(1, 2), d(1_000_000, 0)),
            descriptor(Rail::Ach, 3, 86_400, d(1, 3), d(20, 2), d(1, 0), d(1_000_000, 0)),
            descriptor(Rail::Wire, 4, 86_400, d(0, 0), d(25, 0), d(100, 0), d(100_000_000, 0)),
        ]
        .into_iter()
        .map(|desc| (desc.rail, desc))
        .collect();

        let settings = Rail::ALL
            .iter()
            .map(|rail| (*rail, RailSettings::default_for(*rail)))
            .collect();

        let eu = vec![Rail::Sepa, Rail::CircleUsdc, Rail::Wire, Rail::VisaDirect];
        let country_rails = HashMap::from([
            (
                "US".to_string(),
                vec![
                    Rail::CircleUsdc,
                    Rail::VisaDirect,
                    Rail::MastercardSend,
                    Rail::Ach,
                    Rail::Wire,
                ],
            ),
            ("BR".to_string(), vec![Rail::Pix, Rail::CircleUsdc, Rail::Wire]),
            ("MX".to_string(), vec![Rail::Spei, Rail::CircleUsdc, Rail::Wire]),
            ("DE".to_string(), eu.clone()),
            ("FR".to_string(), eu.clone()),
            ("ES".to_string(), eu),
            (
                "GB".to_string(),
                vec![Rail::Wire, Rail::CircleUsdc, Rail::VisaDirect, Rail::MastercardSend],
            ),
        ]);

        let currency_country = [
            ("USD", "US"),
            ("USDC", "US"),
            ("BRL", "BR"),
            ("MXN", "MX"),
            ("EUR", "DE"),
            ("GBP", "GB"),
        ]
        .into_iter()
        .map(|(cur, country)| (cur.to_string(), country.to_string()))
        .collect();

        let preferences = HashMap::from([
            (
                Protocol::X402,
                vec![Rail::CircleUsdc, Rail::VisaDirect, Rail::MastercardSend],
            ),
            (
                Protocol::Ap2,
                vec![Rail::VisaDirect, Rail::MastercardSend, Rail::CircleUsdc],
            ),
            (
                Protocol::Acp,
                vec![Rail::VisaDirect, Rail::MastercardSend, Rail::Ach],
            ),
            (
                Protocol::Ucp,
                vec![Rail::Pix, Rail::Spei, Rail::CircleUsdc, Rail::Wire],
            ),
            (
                Protocol::CrossBorder,
                vec![Rail::Pix, Rail::Spei, Rail::Sepa, Rail::Wire, Rail::CircleUsdc],
            ),
        ]);

        Self {
            descriptors,
            settings,
            country_rails,
            universal_rails: vec![Rail::CircleUsdc, Rail::Wire],
            currency_country,
            preferences,
        }
    }
}

impl RailCatalog {
    /// Built-in catalog with configuration overrides applied
    pub fn with_overrides(overrides: &[RailOverride]) -> Self {
        let mut catalog = Self::default();
        for o in overrides {
            catalog.apply_override(o);
        }
        catalog
    }

    /// Apply one override; entries without a rail only carry settings
    pub fn apply_override(&mut self, o: &RailOverride) {
        let rail = match (o.rail, &o.settings) {
            (Some(rail), _) => rail,
            (None, Some(settings)) => settings.rail(),
            (None, None) => return,
        };
        if let Some(desc) = self.descriptors.get_mut(&rail) {
            if let Some(v) = o.priority {
                desc.priority = v;
            }
            if let Some(v) = o.fee_percentage {
                desc.fee_percentage = v;
            }
            if let Some(v) = o.fee_fixed {
                desc.fee_fixed = v;
            }
            if let Some(v) = o.min_amount {
                desc.min_amount = v;
            }
            if let Some(v) = o.max_amount {
                desc.max_amount = v;
            }
            if let Some(v) = o.supported {
                desc.supported = v;
            }
        }
        if let Some(settings) = &o.settings {
            if settings.rail() == rail {
                self.settings.insert(rail, settings.clone());
            } else {
                tracing::warn!(
                    rail = %rail,
                    settings_rail = %settings.rail(),
                    "Ignoring rail settings for a different rail"
                );
            }
        }
    }

    /// Catalog entry for a rail
    pub fn descriptor(&self, rail: Rail) -> Option<&RailDescriptor> {
        self.descriptors.get(&rail)
    }

    /// Connection settings for a rail
    pub fn settings(&self, rail: Rail) -> Option<&RailSettings> {
        self.settings.get(&rail)
    }

    /// All descriptors ordered by rail
    pub fn descriptors(&self) -> impl Iterator<Item = &RailDescriptor> {
        self.descriptors.values()
    }

    /// Rails enabled for a country, falling back to the universal set
    pub fn rails_for_country(&self, country: &str) -> &[Rail] {
        self.country_rails
            .get(&country.to_uppercase())
            .map(Vec::as_slice)
            .unwrap_or(&self.universal_rails)
    }

    /// Country a currency settles into
    pub fn country_for_currency(&self, currency: &str) -> &str {
        self.currency_country
            .get(&currency.to_uppercase())
            .map(String::as_str)
            .unwrap_or(DEFAULT_COUNTRY)
    }

    /// Ordered rail preference for a protocol
    pub fn preferences(&self, protocol: Protocol) -> &[Rail] {
        self.preferences
            .get(&protocol)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Country whose holiday calendar gates the rail
    pub fn holiday_country(rail: Rail) -> Option<&'static str> {
        match rail {
            Rail::CircleUsdc => None,
            Rail::Pix => Some("BR"),
            Rail::Spei => Some("MX"),
            Rail::VisaDirect | Rail::MastercardSend | Rail::Ach | Rail::Wire => Some("US"),
            Rail::Sepa => Some("DE"),
        }
    }
}
