//! Collaborator contracts: the player wallet and online-player activity.
//!
//! Genforge keeps no currency ledger of its own. Gameplay charges and pays
//! out through a [`Wallet`]; the economy controller reads the wallet total
//! and the [`PlayerActivity`] count when it computes its factors.

use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::DashMap;
use genforge_types::PlayerId;
use rust_decimal::Decimal;

/// A player's spendable balance, held by an external economy.
pub trait Wallet: Send + Sync {
    /// Whether `player` can afford `amount`.
    fn has(&self, player: PlayerId, amount: Decimal) -> bool;

    /// Take `amount` from `player`. Returns `false` and changes nothing if
    /// the balance is too low.
    fn withdraw(&self, player: PlayerId, amount: Decimal) -> bool;

    /// Give `amount` to `player`.
    fn deposit(&self, player: PlayerId, amount: Decimal);

    /// Sum of every balance.
    fn total_balance(&self) -> Decimal;
}

/// Number of players currently online.
pub trait PlayerActivity: Send + Sync {
    /// Players online right now.
    fn online_players(&self) -> u32;
}

// ---------------------------------------------------------------------------
// In-memory wallet
// ---------------------------------------------------------------------------

/// A [`Wallet`] kept in process memory.
///
/// New players start with `starting_balance`. Balances never go below zero.
#[derive(Debug, Default)]
pub struct InMemoryWallet {
    balances: DashMap<PlayerId, Decimal>,
    starting_balance: Decimal,
}

impl InMemoryWallet {
    /// Create a wallet where unseen players start at `starting_balance`.
    pub fn new(starting_balance: Decimal) -> Self {
        Self {
            balances: DashMap::new(),
            starting_balance,
        }
    }

    /// Current balance of `player`.
    pub fn balance(&self, player: PlayerId) -> Decimal {
        self.balances
            .get(&player)
            .map_or(self.starting_balance, |balance| *balance)
    }

    /// Overwrite the balance of `player`.
    pub fn set_balance(&self, player: PlayerId, amount: Decimal) {
        self.balances.insert(player, amount.max(Decimal::ZERO));
    }
}

impl Wallet for InMemoryWallet {
    fn has(&self, player: PlayerId, amount: Decimal) -> bool {
        self.balance(player) >= amount
    }

    fn withdraw(&self, player: PlayerId, amount: Decimal) -> bool {
        if amount.is_sign_negative() {
            return false;
        }
        let mut balance = self
            .balances
            .entry(player)
            .or_insert(self.starting_balance);
        match balance.checked_sub(amount) {
            Some(remaining) if !remaining.is_sign_negative() => {
                *balance = remaining;
                true
            }
            _ => false,
        }
    }

    fn deposit(&self, player: PlayerId, amount: Decimal) {
        if amount.is_sign_negative() {
            return;
        }
        let mut balance = self
            .balances
            .entry(player)
            .or_insert(self.starting_balance);
        *balance = balance.saturating_add(amount);
    }

    fn total_balance(&self) -> Decimal {
        self.balances
            .iter()
            .fold(Decimal::ZERO, |sum, entry| sum.saturating_add(*entry.value()))
    }
}

// ---------------------------------------------------------------------------
// Online counter
// ---------------------------------------------------------------------------

/// A [`PlayerActivity`] fed by join and quit notifications.
#[derive(Debug, Default)]
pub struct OnlineCounter {
    online: AtomicU32,
}

impl OnlineCounter {
    /// Create a counter at zero.
    pub const fn new() -> Self {
        Self {
            online: AtomicU32::new(0),
        }
    }

    /// Record a join.
    pub fn joined(&self) {
        let _ = self
            .online
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_add(1));
    }

    /// Record a quit.
    pub fn left(&self) {
        let _ = self
            .online
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Overwrite the count.
    pub fn set(&self, online: u32) {
        self.online.store(online, Ordering::Relaxed);
    }
}

impl PlayerActivity for OnlineCounter {
    fn online_players(&self) -> u32 {
        self.online.load(Ordering::Relaxed)
    }
}
