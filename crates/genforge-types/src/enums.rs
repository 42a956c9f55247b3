//! Ordered enumerations: permission levels, network tiers, and economic
//! transaction sources.
//!
//! Ordering for [`PermissionLevel`] and [`NetworkTier`] is defined by an
//! explicit `rank()` rather than declaration order, and both `Ord` impls
//! compare ranks.

use core::cmp::Ordering;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ---------------------------------------------------------------------------
// Permission levels
// ---------------------------------------------------------------------------

/// Role a player holds on a network.
///
/// `Owner` is never stored: it is derived from the network's owner field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export, export_to = "bindings/")]
pub enum PermissionLevel {
    /// No access.
    None,
    /// May see the network and its members.
    View,
    /// May collect from member generators.
    Use,
    /// May add and remove generators.
    Manage,
    /// May manage members and upgrade the tier.
    Admin,
    /// The network owner (derived only).
    Owner,
}

impl PermissionLevel {
    /// Every level, lowest rank first.
    pub const ALL: [Self; 6] = [
        Self::None,
        Self::View,
        Self::Use,
        Self::Manage,
        Self::Admin,
        Self::Owner,
    ];

    /// Explicit integer rank of the level.
    pub const fn rank(self) -> u8 {
        match self {
            Self::None => 0,
            Self::View => 1,
            Self::Use => 2,
            Self::Manage => 3,
            Self::Admin => 4,
            Self::Owner => 5,
        }
    }

    /// Look a level up by rank.
    pub const fn from_rank(rank: u8) -> Option<Self> {
        match rank {
            0 => Some(Self::None),
            1 => Some(Self::View),
            2 => Some(Self::Use),
            3 => Some(Self::Manage),
            4 => Some(Self::Admin),
            5 => Some(Self::Owner),
            _ => None,
        }
    }

    /// Whether a player holding `self` satisfies `required`.
    pub const fn allows(self, required: Self) -> bool {
        self.rank() >= required.rank()
    }

    /// Whether this level may be written to the membership table.
    pub const fn is_grantable(self) -> bool {
        !matches!(self, Self::Owner)
    }

    /// Storage and display name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::View => "VIEW",
            Self::Use => "USE",
            Self::Manage => "MANAGE",
            Self::Admin => "ADMIN",
            Self::Owner => "OWNER",
        }
    }

    /// Parse a level from its storage name (case-insensitive).
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(raw.trim()))
    }
}

impl PartialOrd for PermissionLevel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PermissionLevel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl core::fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Network tiers
// ---------------------------------------------------------------------------

/// Grade of a network. Tiers only ever move up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export, export_to = "bindings/")]
pub enum NetworkTier {
    /// Entry tier.
    Basic,
    /// Second tier.
    Advanced,
    /// Third tier.
    Elite,
    /// Highest tier.
    Ultimate,
}

impl NetworkTier {
    /// Every tier, lowest rank first.
    pub const ALL: [Self; 4] = [Self::Basic, Self::Advanced, Self::Elite, Self::Ultimate];

    /// Explicit integer rank, used by the capacity and range formulas.
    pub const fn rank(self) -> u32 {
        match self {
            Self::Basic => 0,
            Self::Advanced => 1,
            Self::Elite => 2,
            Self::Ultimate => 3,
        }
    }

    /// The tier directly above this one, if any.
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Basic => Some(Self::Advanced),
            Self::Advanced => Some(Self::Elite),
            Self::Elite => Some(Self::Ultimate),
            Self::Ultimate => None,
        }
    }

    /// Storage and display name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "BASIC",
            Self::Advanced => "ADVANCED",
            Self::Elite => "ELITE",
            Self::Ultimate => "ULTIMATE",
        }
    }

    /// Parse a tier from its storage name (case-insensitive).
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|tier| tier.as_str().eq_ignore_ascii_case(raw.trim()))
    }
}

impl PartialOrd for NetworkTier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NetworkTier {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl core::fmt::Display for NetworkTier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Economic transaction sources
// ---------------------------------------------------------------------------

/// What produced a row in the `economic_transactions` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum TransactionSource {
    /// Output collected from a generator.
    Collection,
    /// Generator level purchased.
    Upgrade,
    /// Generator evolved into another type.
    Evolution,
    /// Network tier purchased.
    NetworkUpgrade,
}

impl TransactionSource {
    /// Storage name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Collection => "collection",
            Self::Upgrade => "upgrade",
            Self::Evolution => "evolution",
            Self::NetworkUpgrade => "network_upgrade",
        }
    }

    /// Whether rows of this source count as earnings (money entering the
    /// economy) rather than spending.
    pub const fn is_earning(self) -> bool {
        matches!(self, Self::Collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_order_follows_rank() {
        let mut shuffled = vec![
            PermissionLevel::Admin,
            PermissionLevel::None,
            PermissionLevel::Owner,
            PermissionLevel::Use,
            PermissionLevel::View,
            PermissionLevel::Manage,
        ];
        shuffled.sort();
        assert_eq!(shuffled, PermissionLevel::ALL.to_vec());
    }

    #[test]
    fn permission_allows_is_rank_comparison() {
        assert!(PermissionLevel::Admin.allows(PermissionLevel::Manage));
        assert!(PermissionLevel::Use.allows(PermissionLevel::Use));
        assert!(!PermissionLevel::View.allows(PermissionLevel::Use));
        assert!(PermissionLevel::Owner.allows(PermissionLevel::Admin));
    }

    #[test]
    fn owner_is_not_grantable() {
        assert!(!PermissionLevel::Owner.is_grantable());
        assert!(PermissionLevel::Admin.is_grantable());
    }

    #[test]
    fn permission_rank_roundtrip() {
        for level in PermissionLevel::ALL {
            assert_eq!(PermissionLevel::from_rank(level.rank()), Some(level));
        }
        assert_eq!(PermissionLevel::from_rank(9), None);
    }

    #[test]
    fn permission_parse_is_case_insensitive() {
        assert_eq!(PermissionLevel::parse("manage"), Some(PermissionLevel::Manage));
        assert_eq!(PermissionLevel::parse("bogus"), None);
    }

    #[test]
    fn tier_next_is_strictly_higher() {
        for tier in NetworkTier::ALL {
            if let Some(next) = tier.next() {
                assert!(next > tier);
                assert_eq!(next.rank(), tier.rank().saturating_add(1));
            }
        }
        assert_eq!(NetworkTier::Ultimate.next(), None);
    }

    #[test]
    fn tier_serializes_screaming_case() {
        let json = serde_json::to_string(&NetworkTier::Advanced).ok();
        assert_eq!(json.as_deref(), Some("\"ADVANCED\""));
    }
}
