//! Identity provider: users and their derived reliability tier
use crate::error::TradeError;
use crate::store::{self, TxResult};
use crate::types::UserId;
use serde::Serialize;
use sled::transaction::TransactionalTree;

pub(crate) const USERS_TREE: &str = "users";

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct User {
    #[n(0)]
    pub id: UserId,
    #[n(1)]
    pub display_name: String,
    #[n(2)]
    pub completed_trades: u32,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReliabilityTier {
    New,
    Reliable,
    VeryReliable,
    Trusted,
}

impl ReliabilityTier {
    pub fn from_completed_trades(count: u32) -> Self {
        match count {
            0 => ReliabilityTier::New,
            1..=4 => ReliabilityTier::Reliable,
            5..=9 => ReliabilityTier::VeryReliable,
            _ => ReliabilityTier::Trusted,
        }
    }
}

impl User {
    pub fn new(display_name: &str) -> anyhow::Result<Self> {
        Ok(Self {
            id: UserId::generate()?,
            display_name: display_name.to_owned(),
            completed_trades: 0,
        })
    }

    pub fn reliability_tier(&self) -> ReliabilityTier {
        ReliabilityTier::from_completed_trades(self.completed_trades)
    }
}

#[derive(Clone)]
pub struct UserDirectory {
    tree: sled::Tree,
}

impl UserDirectory {
    pub fn open(db: &sled::Db) -> Result<Self, TradeError> {
        Ok(Self {
            tree: db.open_tree(USERS_TREE)?,
        })
    }

    pub(crate) fn tree(&self) -> &sled::Tree {
        &self.tree
    }

    pub fn insert(&self, user: &User) -> Result<(), TradeError> {
        self.tree.insert(user.id.as_bytes(), store::encode(user)?)?;
        Ok(())
    }

    pub fn get_user(&self, id: &UserId) -> Result<User, TradeError> {
        match self.tree.get(id.as_bytes())? {
            Some(bytes) => store::decode(&bytes),
            None => Err(TradeError::not_found("user", id)),
        }
    }

    pub fn contains(&self, id: &UserId) -> Result<bool, TradeError> {
        Ok(self.tree.contains_key(id.as_bytes())?)
    }
}

/// Bumps the completed-trade counter of a known user; unknown users are skipped
pub(crate) fn record_completion(tx: &TransactionalTree, id: &UserId) -> TxResult<()> {
    if let Some(mut user) = store::tx_read::<User>(tx, id.as_bytes())? {
        user.completed_trades = user.completed_trades.saturating_add(1);
        store::tx_write(tx, id.as_bytes(), &user)?;
    }
    Ok(())
}
