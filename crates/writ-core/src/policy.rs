//! Trust tiers and the tier → tool permission matrix.
//!
//! A session resolves to a tier by longest-prefix match over the configured
//! session-key mapping; unmapped sessions get the configured default and
//! never an elevated tier implicitly. A gated tool with no matrix entry for
//! a tier is denied.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};

/// Coarse privilege classification (`T0`, `T1`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TrustTier(u8);

impl TrustTier {
    pub fn new(level: u8) -> Self {
        Self(level)
    }

    pub fn level(&self) -> u8 {
        self.0
    }

    pub fn parse(s: &str) -> Option<Self> {
        let rest = s.strip_prefix('T').or_else(|| s.strip_prefix('t'))?;
        rest.parse::<u8>().ok().map(Self)
    }
}

impl std::fmt::Display for TrustTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T{}", self.0)
    }
}

impl Serialize for TrustTier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TrustTier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).ok_or_else(|| D::Error::custom(format!("invalid trust tier '{s}'")))
    }
}

/// Immutable tier policy: prefix → tier resolution plus the tool matrix.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    default_tier: TrustTier,
    /// Sorted longest-first so the first match wins.
    prefixes: Vec<(String, TrustTier)>,
    matrix: BTreeMap<TrustTier, BTreeSet<String>>,
}

impl PolicyEngine {
    pub fn new(
        default_tier: TrustTier,
        session_tiers: &BTreeMap<String, TrustTier>,
        matrix: &BTreeMap<TrustTier, BTreeSet<String>>,
    ) -> Self {
        let mut prefixes: Vec<(String, TrustTier)> = session_tiers
            .iter()
            .map(|(p, t)| (p.clone(), *t))
            .collect();
        prefixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        Self {
            default_tier,
            prefixes,
            matrix: matrix.clone(),
        }
    }

    pub fn default_tier(&self) -> TrustTier {
        self.default_tier
    }

    /// Longest-prefix match; falls back to the default tier.
    pub fn resolve_tier(&self, session_key: &str) -> TrustTier {
        self.prefixes
            .iter()
            .find(|(prefix, _)| session_key.starts_with(prefix.as_str()))
            .map(|(_, tier)| *tier)
            .unwrap_or(self.default_tier)
    }

    /// Pure matrix lookup. Tools absent from a tier's entry are denied, as
    /// are tiers absent from the matrix.
    pub fn is_tool_permitted(&self, tier: TrustTier, tool: &str) -> bool {
        self.matrix
            .get(&tier)
            .is_some_and(|tools| tools.contains(tool))
    }
}
