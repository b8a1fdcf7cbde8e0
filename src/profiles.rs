use serde::{Deserialize, Serialize};

/// key: profile-variants -> quota rules table
///
/// Closed set of marketplace profile kinds. Everything variant-specific in the
/// engine goes through [`ProfileVariant::rules`] rather than per-variant types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileVariant {
    Player,
    Club,
    Coach,
    Guest,
    Manager,
    Scout,
    Referee,
    Other,
}

/// Quota constants attached to a profile variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariantRules {
    /// Freemium base allotment (B).
    pub freemium_base: i64,
    /// Flat premium allotment (O).
    pub premium_override: i64,
    /// Days the renewable premium pool survives before rolling over (R).
    pub pool_reset_days: i64,
}

pub const PREMIUM_OVERRIDE: i64 = 30;

const PLAYER_RULES: VariantRules = VariantRules {
    freemium_base: 10,
    premium_override: PREMIUM_OVERRIDE,
    pool_reset_days: 30,
};

const DEFAULT_RULES: VariantRules = VariantRules {
    freemium_base: 5,
    premium_override: PREMIUM_OVERRIDE,
    pool_reset_days: 90,
};

const RULES_TABLE: &[(ProfileVariant, VariantRules)] = &[(ProfileVariant::Player, PLAYER_RULES)];

impl ProfileVariant {
    pub const ALL: [ProfileVariant; 8] = [
        ProfileVariant::Player,
        ProfileVariant::Club,
        ProfileVariant::Coach,
        ProfileVariant::Guest,
        ProfileVariant::Manager,
        ProfileVariant::Scout,
        ProfileVariant::Referee,
        ProfileVariant::Other,
    ];

    pub fn rules(&self) -> VariantRules {
        RULES_TABLE
            .iter()
            .find(|(variant, _)| variant == self)
            .map(|(_, rules)| *rules)
            .unwrap_or(DEFAULT_RULES)
    }

    pub fn freemium_base(&self) -> i64 {
        self.rules().freemium_base
    }

    pub fn is_player(&self) -> bool {
        matches!(self, ProfileVariant::Player)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileVariant::Player => "player",
            ProfileVariant::Club => "club",
            ProfileVariant::Coach => "coach",
            ProfileVariant::Guest => "guest",
            ProfileVariant::Manager => "manager",
            ProfileVariant::Scout => "scout",
            ProfileVariant::Referee => "referee",
            ProfileVariant::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|variant| variant.as_str().eq_ignore_ascii_case(value.trim()))
    }
}
