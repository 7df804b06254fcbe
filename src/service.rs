//! Service layer API for trade workflow operations.
//!
//! Every operation runs as one sled transaction over the trade, hold, book and
//! user trees. sled re-runs a transaction that lost a race, so the loser reads
//! the winner's committed state and fails on it instead of applying twice.
use crate::error::TradeError;
use crate::identity::{self, UserDirectory};
use crate::registry::{self, Book, BookRegistry};
use crate::store::{self, TxResult, abort};
use crate::trade::{AcceptanceDecision, ConfirmOutcome, ResponseDecision, Trade};
use crate::types::{BookId, TimeStamp, TradeId, TradeStatus, TradeType, UserId};
use serde::Deserialize;
use sled::Transactional;
use sled::transaction::{ConflictableTransactionError, TransactionalTree};
use std::sync::Arc;
use tracing::{debug, info};

const TRADES_TREE: &str = "trades";
// book id -> id of the active trade the book is attached to
const HOLDS_TREE: &str = "holds";

/// Partition of a user's trades for listing
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TradeRole {
    Sent,
    Received,
    /// Received and still awaiting my response
    Pending,
    Completed,
    Donations,
}

impl TradeRole {
    pub fn matches(self, trade: &Trade, user: &UserId) -> bool {
        match self {
            TradeRole::Sent => trade.requester_id() == user,
            TradeRole::Received => trade.recipient_id() == user,
            TradeRole::Pending => {
                trade.recipient_id() == user && trade.status() == TradeStatus::Pending
            }
            TradeRole::Completed => {
                trade.involves(user) && trade.status() == TradeStatus::Completed
            }
            TradeRole::Donations => {
                trade.involves(user) && trade.trade_type() == TradeType::Donation
            }
        }
    }
}

pub struct TradeService {
    instance: Arc<sled::Db>,
    trades: sled::Tree,
    holds: sled::Tree,
    books: BookRegistry,
    users: UserDirectory,
}

impl TradeService {
    pub fn new(instance: Arc<sled::Db>) -> Result<Self, TradeError> {
        Ok(Self {
            trades: instance.open_tree(TRADES_TREE)?,
            holds: instance.open_tree(HOLDS_TREE)?,
            books: BookRegistry::open(&instance)?,
            users: UserDirectory::open(&instance)?,
            instance,
        })
    }

    pub fn books(&self) -> &BookRegistry {
        &self.books
    }

    pub fn users(&self) -> &UserDirectory {
        &self.users
    }

    pub fn flush(&self) -> Result<(), TradeError> {
        self.instance.flush()?;
        Ok(())
    }

    /// Request someone else's book, optionally offering one of your own
    pub fn create_trade(
        &self,
        requester: &UserId,
        requested_book: &BookId,
        offered_book: Option<&BookId>,
        message: Option<String>,
    ) -> Result<Trade, TradeError> {
        if !self.users.contains(requester)? {
            return Err(TradeError::not_found("user", requester));
        }
        let trade_id = TradeId::generate()?;
        let now = TimeStamp::new();

        let trade = (&self.trades, &self.holds, self.books.tree()).transaction(
            |(trades, holds, books)| {
                let book = registry::load_book(books, requested_book)?;
                if book.owner_id == *requester {
                    return abort(TradeError::Forbidden(
                        "cannot request a book you own".into(),
                    ));
                }
                if !book.available {
                    return abort(TradeError::InvalidRequest(format!(
                        "book {requested_book} is not available"
                    )));
                }
                ensure_unattached(holds, requested_book)?;

                if let Some(offered) = offered_book {
                    let offered = registry::load_book(books, offered)?;
                    if offered.owner_id != *requester {
                        return abort(TradeError::InvalidRequest(format!(
                            "offered book {} does not belong to the requester",
                            offered.id
                        )));
                    }
                    if !offered.available {
                        return abort(TradeError::InvalidRequest(format!(
                            "offered book {} is not available",
                            offered.id
                        )));
                    }
                }

                let trade = lift(Trade::propose(
                    trade_id.clone(),
                    requester.clone(),
                    book.owner_id.clone(),
                    requested_book.clone(),
                    offered_book.cloned(),
                    message.clone(),
                    now.clone(),
                ))?;
                attach(holds, requested_book, &trade_id)?;
                store_trade(trades, &trade)?;
                Ok(trade)
            },
        )?;

        info!(
            trade_id = %trade.id(),
            requester = %requester,
            recipient = %trade.recipient_id(),
            trade_type = ?trade.trade_type(),
            "trade requested"
        );
        Ok(trade)
    }

    /// Recipient accepts (as swap or donation) or rejects a pending trade
    pub fn respond_to_trade(
        &self,
        trade_id: &TradeId,
        actor: &UserId,
        decision: ResponseDecision,
    ) -> Result<Trade, TradeError> {
        let now = TimeStamp::new();

        let trade = (&self.trades, &self.holds, self.books.tree()).transaction(
            |(trades, holds, books)| {
                let mut trade = load_trade(trades, trade_id)?;
                lift(trade.respond(actor, decision.clone(), now.clone()))?;

                match trade.status() {
                    TradeStatus::Accepted => {
                        if let ResponseDecision::Accept(AcceptanceDecision::Swap { counter_offer }) =
                            &decision
                        {
                            attach_counter_offer(holds, books, &trade, counter_offer)?;
                            if let Some(offered) = trade.offered_book_id().cloned() {
                                if offer_still_eligible(holds, books, &trade, &offered)? {
                                    attach(holds, &offered, trade.id())?;
                                } else {
                                    debug!(
                                        trade_id = %trade_id,
                                        book = %offered,
                                        "original offer no longer eligible, dropped"
                                    );
                                    trade.withdraw_offer();
                                }
                            }
                        }
                    }
                    _ => release(holds, &trade)?,
                }

                store_trade(trades, &trade)?;
                Ok(trade)
            },
        )?;

        info!(
            trade_id = %trade_id,
            actor = %actor,
            status = %trade.status(),
            trade_type = ?trade.trade_type(),
            "trade response recorded"
        );
        Ok(trade)
    }

    pub fn accept_trade(
        &self,
        trade_id: &TradeId,
        actor: &UserId,
        decision: AcceptanceDecision,
    ) -> Result<Trade, TradeError> {
        self.respond_to_trade(trade_id, actor, ResponseDecision::Accept(decision))
    }

    pub fn reject_trade(&self, trade_id: &TradeId, actor: &UserId) -> Result<Trade, TradeError> {
        self.respond_to_trade(trade_id, actor, ResponseDecision::Reject)
    }

    /// Requester withdraws a trade the recipient has not answered
    pub fn cancel_trade(&self, trade_id: &TradeId, actor: &UserId) -> Result<Trade, TradeError> {
        let now = TimeStamp::new();

        let trade = (&self.trades, &self.holds).transaction(|(trades, holds)| {
            let mut trade = load_trade(trades, trade_id)?;
            lift(trade.cancel(actor, now.clone()))?;
            release(holds, &trade)?;
            store_trade(trades, &trade)?;
            Ok(trade)
        })?;

        info!(trade_id = %trade_id, actor = %actor, "trade cancelled");
        Ok(trade)
    }

    /// A party confirms receipt. Completion transfers the books, takes them
    /// off the market and credits both users.
    pub fn confirm_receipt(&self, trade_id: &TradeId, actor: &UserId) -> Result<Trade, TradeError> {
        let now = TimeStamp::new();

        let (trade, outcome) = (
            &self.trades,
            &self.holds,
            self.books.tree(),
            self.users.tree(),
        )
            .transaction(|(trades, holds, books, users)| {
                let mut trade = load_trade(trades, trade_id)?;
                let outcome = lift(trade.confirm(actor, now.clone()))?;

                match outcome {
                    ConfirmOutcome::AlreadyConfirmed => return Ok((trade, outcome)),
                    ConfirmOutcome::Recorded => {}
                    ConfirmOutcome::Completed => {
                        settle(books, &trade)?;
                        release(holds, &trade)?;
                        identity::record_completion(users, trade.requester_id())?;
                        identity::record_completion(users, trade.recipient_id())?;
                    }
                }

                store_trade(trades, &trade)?;
                Ok((trade, outcome))
            })?;

        match outcome {
            ConfirmOutcome::AlreadyConfirmed => {
                debug!(trade_id = %trade_id, actor = %actor, "repeat confirmation ignored")
            }
            ConfirmOutcome::Recorded => {
                info!(trade_id = %trade_id, actor = %actor, "receipt confirmed")
            }
            ConfirmOutcome::Completed => {
                info!(trade_id = %trade_id, actor = %actor, "trade completed");
                trade.view_history();
            }
        }
        Ok(trade)
    }

    /// Load a trade visible to `viewer`
    pub fn get_trade(&self, trade_id: &TradeId, viewer: &UserId) -> Result<Trade, TradeError> {
        let trade = self.trade(trade_id)?;
        if !trade.involves(viewer) {
            return Err(TradeError::Forbidden(
                "only the parties may view a trade".into(),
            ));
        }
        Ok(trade)
    }

    pub fn trade(&self, trade_id: &TradeId) -> Result<Trade, TradeError> {
        match self.trades.get(trade_id.as_bytes())? {
            Some(bytes) => store::decode(&bytes),
            None => Err(TradeError::not_found("trade", trade_id)),
        }
    }

    /// Trades involving `user`, newest first
    pub fn list_trades(
        &self,
        user: &UserId,
        role: Option<TradeRole>,
    ) -> Result<Vec<Trade>, TradeError> {
        let mut trades: Vec<Trade> = store::scan::<Trade>(&self.trades)?
            .into_iter()
            .filter(|trade| match role {
                Some(role) => role.matches(trade, user),
                None => trade.involves(user),
            })
            .collect();
        trades.sort_by(|a, b| b.created_at().cmp(a.created_at()));
        Ok(trades)
    }

    /// Whether a book should show up as listed: its stored flag is set and no
    /// active trade holds it
    pub fn is_listed(&self, book: &BookId) -> Result<bool, TradeError> {
        let stored = self.books.get_book(book)?;
        Ok(stored.available && !self.holds.contains_key(book.as_bytes())?)
    }

    /// Id of the active trade a book is attached to, if any
    pub fn holder_of(&self, book: &BookId) -> Result<Option<TradeId>, TradeError> {
        Ok(self
            .holds
            .get(book.as_bytes())?
            .map(|id| TradeId::from(String::from_utf8_lossy(&id).into_owned())))
    }
}

fn lift<T>(result: Result<T, TradeError>) -> TxResult<T> {
    result.map_err(ConflictableTransactionError::Abort)
}

fn load_trade(trades: &TransactionalTree, id: &TradeId) -> TxResult<Trade> {
    match store::tx_read(trades, id.as_bytes())? {
        Some(trade) => Ok(trade),
        None => abort(TradeError::not_found("trade", id)),
    }
}

fn store_trade(trades: &TransactionalTree, trade: &Trade) -> TxResult<()> {
    store::tx_write(trades, trade.id().as_bytes(), trade)
}

fn ensure_unattached(holds: &TransactionalTree, book: &BookId) -> TxResult<()> {
    if holds.get(book.as_bytes())?.is_some() {
        return abort(TradeError::Conflict(format!(
            "book {book} is already attached to an active trade"
        )));
    }
    Ok(())
}

fn attach(holds: &TransactionalTree, book: &BookId, trade_id: &TradeId) -> TxResult<()> {
    holds.insert(book.as_bytes(), trade_id.as_bytes())?;
    Ok(())
}

// Drops every hold still owned by this trade
fn release(holds: &TransactionalTree, trade: &Trade) -> TxResult<()> {
    let books = [
        Some(trade.requested_book_id()),
        trade.recipient_offered_book_id(),
        trade.offered_book_id(),
    ];
    for book in books.into_iter().flatten() {
        if let Some(holder) = holds.get(book.as_bytes())? {
            if holder.as_ref() == trade.id().as_bytes() {
                holds.remove(book.as_bytes())?;
            }
        }
    }
    Ok(())
}

fn attach_counter_offer(
    holds: &TransactionalTree,
    books: &TransactionalTree,
    trade: &Trade,
    counter_offer: &BookId,
) -> TxResult<()> {
    let book = registry::load_book(books, counter_offer)?;
    if book.owner_id != *trade.recipient_id() {
        return abort(TradeError::InvalidRequest(format!(
            "counter-offer {counter_offer} does not belong to the recipient"
        )));
    }
    if !book.available {
        return abort(TradeError::InvalidRequest(format!(
            "counter-offer {counter_offer} is not available"
        )));
    }
    ensure_unattached(holds, counter_offer)?;
    attach(holds, counter_offer, trade.id())
}

// The requester's original offer joins a swap only if it is still theirs to
// give and no other active trade holds it
fn offer_still_eligible(
    holds: &TransactionalTree,
    books: &TransactionalTree,
    trade: &Trade,
    offered: &BookId,
) -> TxResult<bool> {
    let Some(book) = store::tx_read::<Book>(books, offered.as_bytes())? else {
        return Ok(false);
    };
    Ok(book.owner_id == *trade.requester_id()
        && book.available
        && holds.get(offered.as_bytes())?.is_none())
}

fn settle(books: &TransactionalTree, trade: &Trade) -> TxResult<()> {
    for transfer in trade.settlement() {
        let mut book = registry::load_book(books, &transfer.book)?;
        if book.owner_id != transfer.from {
            return abort(TradeError::Conflict(format!(
                "book {} changed owner while the trade was open",
                transfer.book
            )));
        }
        book.owner_id = transfer.to;
        book.available = false;
        registry::store_book(books, &book)?;
    }
    Ok(())
}
