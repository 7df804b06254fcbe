//! The trade entity and its state machine.
//!
//! ```text
//! pending --accept--> accepted --confirm(s)--> completed
//!    |  \--reject--> rejected
//!     \----cancel--> cancelled
//! ```
//!
//! Methods here only check actor standing and status, and mutate the trade in
//! memory. Book checks and persistence belong to [`crate::service::TradeService`],
//! which discards the in-memory copy whenever a transition fails.
use super::context::{Witness, WitnessType, verify_chain};
use super::error::TradeError;
use super::types::{BookId, Party, TimeStamp, TradeId, TradeStatus, TradeType, UserId};
use chrono::Utc;
use serde::Serialize;

#[derive(minicbor::Encode, minicbor::Decode, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    #[n(0)]
    id: TradeId,
    #[n(1)]
    requester_id: UserId,
    #[n(2)]
    recipient_id: UserId, // owner of the requested book at creation
    #[n(3)]
    requested_book_id: BookId,
    #[n(4)]
    offered_book_id: Option<BookId>,
    #[n(5)]
    recipient_offered_book_id: Option<BookId>,
    #[n(6)]
    trade_type: TradeType,
    #[n(7)]
    status: TradeStatus,
    #[n(8)]
    requester_confirmed: bool,
    #[n(9)]
    recipient_confirmed: bool,
    #[n(10)]
    message: Option<String>,
    #[n(11)]
    created_at: TimeStamp<Utc>,
    #[n(12)]
    updated_at: TimeStamp<Utc>,
    #[n(13)]
    history: Vec<Witness>,
}

/// How the recipient accepts. The chosen variant replaces the requester's
/// proposed trade type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptanceDecision {
    Swap { counter_offer: BookId },
    Donation,
}

impl AcceptanceDecision {
    /// Build a decision from the loose `{tradeType, recipientOfferedBook?}` shape
    pub fn from_request(
        trade_type: TradeType,
        counter_offer: Option<BookId>,
    ) -> Result<Self, TradeError> {
        match (trade_type, counter_offer) {
            (TradeType::Swap, Some(counter_offer)) => Ok(Self::Swap { counter_offer }),
            (TradeType::Swap, None) => Err(TradeError::InvalidRequest(
                "a swap acceptance requires a counter-offer book".into(),
            )),
            (TradeType::Donation, None) => Ok(Self::Donation),
            (TradeType::Donation, Some(_)) => Err(TradeError::InvalidRequest(
                "a donation acceptance must not carry a counter-offer book".into(),
            )),
        }
    }

    pub fn trade_type(&self) -> TradeType {
        match self {
            AcceptanceDecision::Swap { .. } => TradeType::Swap,
            AcceptanceDecision::Donation => TradeType::Donation,
        }
    }

    pub fn counter_offer(&self) -> Option<&BookId> {
        match self {
            AcceptanceDecision::Swap { counter_offer } => Some(counter_offer),
            AcceptanceDecision::Donation => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseDecision {
    Accept(AcceptanceDecision),
    Reject,
}

/// Who has to confirm before a trade completes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationRule {
    /// Donations: only the recipient confirms, and that alone completes
    RecipientOnly,
    BothParties,
}

impl From<TradeType> for ConfirmationRule {
    fn from(value: TradeType) -> Self {
        match value {
            TradeType::Donation => ConfirmationRule::RecipientOnly,
            TradeType::Swap => ConfirmationRule::BothParties,
        }
    }
}

impl ConfirmationRule {
    pub fn may_confirm(self, party: Party) -> bool {
        match self {
            ConfirmationRule::RecipientOnly => party == Party::Recipient,
            ConfirmationRule::BothParties => true,
        }
    }

    pub fn is_satisfied(self, requester_confirmed: bool, recipient_confirmed: bool) -> bool {
        match self {
            ConfirmationRule::RecipientOnly => recipient_confirmed,
            ConfirmationRule::BothParties => requester_confirmed && recipient_confirmed,
        }
    }
}

/// One ownership change applied when a trade completes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub book: BookId,
    pub from: UserId,
    pub to: UserId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Recorded,
    /// Repeat confirmation by the same party; nothing changed
    AlreadyConfirmed,
    Completed,
}

impl Trade {
    /// Open a new pending trade. A present `offered_book` makes it a swap
    /// proposal, otherwise a donation request.
    pub fn propose(
        id: TradeId,
        requester: UserId,
        recipient: UserId,
        requested_book: BookId,
        offered_book: Option<BookId>,
        message: Option<String>,
        now: TimeStamp<Utc>,
    ) -> Result<Self, TradeError> {
        if requester == recipient {
            return Err(TradeError::Forbidden(
                "cannot request a book you own".into(),
            ));
        }
        let trade_type = match offered_book {
            Some(_) => TradeType::Swap,
            None => TradeType::Donation,
        };
        let message = message.filter(|m| !m.trim().is_empty());

        let mut trade = Self {
            id,
            requester_id: requester.clone(),
            recipient_id: recipient,
            requested_book_id: requested_book.clone(),
            offered_book_id: offered_book.clone(),
            recipient_offered_book_id: None,
            trade_type,
            status: TradeStatus::Pending,
            requester_confirmed: false,
            recipient_confirmed: false,
            message,
            created_at: now.clone(),
            updated_at: now.clone(),
            history: vec![],
        };
        trade.record(
            &requester,
            &now,
            WitnessType::Request {
                requested_book,
                offered_book,
            },
        )?;
        Ok(trade)
    }

    pub fn id(&self) -> &TradeId {
        &self.id
    }
    pub fn requester_id(&self) -> &UserId {
        &self.requester_id
    }
    pub fn recipient_id(&self) -> &UserId {
        &self.recipient_id
    }
    pub fn requested_book_id(&self) -> &BookId {
        &self.requested_book_id
    }
    pub fn offered_book_id(&self) -> Option<&BookId> {
        self.offered_book_id.as_ref()
    }
    pub fn recipient_offered_book_id(&self) -> Option<&BookId> {
        self.recipient_offered_book_id.as_ref()
    }
    pub fn trade_type(&self) -> TradeType {
        self.trade_type
    }
    pub fn status(&self) -> TradeStatus {
        self.status
    }
    pub fn requester_confirmed(&self) -> bool {
        self.requester_confirmed
    }
    pub fn recipient_confirmed(&self) -> bool {
        self.recipient_confirmed
    }
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
    pub fn created_at(&self) -> &TimeStamp<Utc> {
        &self.created_at
    }
    pub fn updated_at(&self) -> &TimeStamp<Utc> {
        &self.updated_at
    }
    pub fn history(&self) -> &[Witness] {
        &self.history
    }

    pub fn party_of(&self, user: &UserId) -> Option<Party> {
        if *user == self.requester_id {
            Some(Party::Requester)
        } else if *user == self.recipient_id {
            Some(Party::Recipient)
        } else {
            None
        }
    }

    pub fn involves(&self, user: &UserId) -> bool {
        self.party_of(user).is_some()
    }

    pub fn confirmation_rule(&self) -> ConfirmationRule {
        self.trade_type.into()
    }

    /// Books this trade keeps off the market while it is active
    pub fn held_books(&self) -> Vec<&BookId> {
        let mut books = vec![&self.requested_book_id];
        if self.status == TradeStatus::Accepted && self.trade_type == TradeType::Swap {
            books.extend(self.recipient_offered_book_id.as_ref());
            books.extend(self.offered_book_id.as_ref());
        }
        books
    }

    /// Ownership changes owed once the trade completes. Every listed book
    /// ends up with `to` and off the market.
    pub fn settlement(&self) -> Vec<Transfer> {
        let mut transfers = vec![Transfer {
            book: self.requested_book_id.clone(),
            from: self.recipient_id.clone(),
            to: self.requester_id.clone(),
        }];
        if self.trade_type == TradeType::Swap {
            if let Some(counter_offer) = &self.recipient_offered_book_id {
                // the recipient keeps the counter-offer, now committed to this trade
                transfers.push(Transfer {
                    book: counter_offer.clone(),
                    from: self.recipient_id.clone(),
                    to: self.recipient_id.clone(),
                });
            }
            if let Some(offered) = &self.offered_book_id {
                transfers.push(Transfer {
                    book: offered.clone(),
                    from: self.requester_id.clone(),
                    to: self.recipient_id.clone(),
                });
            }
        }
        transfers
    }

    /// Recipient accepts or rejects a pending trade
    pub fn respond(
        &mut self,
        actor: &UserId,
        decision: ResponseDecision,
        now: TimeStamp<Utc>,
    ) -> Result<(), TradeError> {
        if *actor != self.recipient_id {
            return Err(TradeError::Forbidden(
                "only the recipient may respond to a trade".into(),
            ));
        }
        let action = match decision {
            ResponseDecision::Accept(_) => "accept",
            ResponseDecision::Reject => "reject",
        };
        self.require_status(TradeStatus::Pending, action)?;

        match decision {
            ResponseDecision::Accept(acceptance) => {
                let trade_type = acceptance.trade_type();
                let counter_offer = acceptance.counter_offer().cloned();
                if counter_offer.as_ref() == Some(&self.requested_book_id) {
                    return Err(TradeError::InvalidRequest(
                        "the counter-offer cannot be the requested book".into(),
                    ));
                }
                self.record(
                    actor,
                    &now,
                    WitnessType::Accept {
                        trade_type,
                        counter_offer: counter_offer.clone(),
                    },
                )?;
                self.trade_type = trade_type;
                self.recipient_offered_book_id = counter_offer;
                self.status = TradeStatus::Accepted;
            }
            ResponseDecision::Reject => {
                self.record(actor, &now, WitnessType::Reject)?;
                self.status = TradeStatus::Rejected;
            }
        }
        Ok(())
    }

    /// Drops the requester's original offer from an accepted swap, so that
    /// neither `held_books` nor `settlement` includes it
    pub fn withdraw_offer(&mut self) {
        self.offered_book_id = None;
    }

    /// Requester withdraws a trade that has not been answered yet
    pub fn cancel(&mut self, actor: &UserId, now: TimeStamp<Utc>) -> Result<(), TradeError> {
        if *actor != self.requester_id {
            return Err(TradeError::Forbidden(
                "only the requester may cancel a trade".into(),
            ));
        }
        self.require_status(TradeStatus::Pending, "cancel")?;

        self.record(actor, &now, WitnessType::Cancel)?;
        self.status = TradeStatus::Cancelled;
        Ok(())
    }

    /// Record that `actor` received their side of the exchange
    pub fn confirm(
        &mut self,
        actor: &UserId,
        now: TimeStamp<Utc>,
    ) -> Result<ConfirmOutcome, TradeError> {
        let party = self.party_of(actor).ok_or_else(|| {
            TradeError::Forbidden("only a party to the trade may confirm it".into())
        })?;
        self.require_status(TradeStatus::Accepted, "confirm")?;

        let rule = self.confirmation_rule();
        if !rule.may_confirm(party) {
            return Err(TradeError::Forbidden(
                "only the recipient confirms a donation".into(),
            ));
        }

        let already = match party {
            Party::Requester => self.requester_confirmed,
            Party::Recipient => self.recipient_confirmed,
        };
        if already {
            return Ok(ConfirmOutcome::AlreadyConfirmed);
        }

        self.record(actor, &now, WitnessType::Confirm { party })?;
        match party {
            Party::Requester => self.requester_confirmed = true,
            Party::Recipient => self.recipient_confirmed = true,
        }

        if rule.is_satisfied(self.requester_confirmed, self.recipient_confirmed) {
            self.record(actor, &now, WitnessType::Complete)?;
            self.status = TradeStatus::Completed;
            return Ok(ConfirmOutcome::Completed);
        }
        Ok(ConfirmOutcome::Recorded)
    }

    pub fn verify_history(&self) -> bool {
        verify_chain(&self.history)
    }

    /// Checks the structural invariants every stored trade must satisfy
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.requester_id == self.recipient_id {
            return Err("requester and recipient are the same user".into());
        }

        let settled = matches!(self.status, TradeStatus::Accepted | TradeStatus::Completed);
        let expects_counter_offer = settled && self.trade_type == TradeType::Swap;
        if expects_counter_offer != self.recipient_offered_book_id.is_some() {
            return Err(format!(
                "counter-offer presence does not match {} {:?} trade",
                self.status, self.trade_type
            ));
        }

        if !settled && (self.requester_confirmed || self.recipient_confirmed) {
            return Err(format!("{} trade carries confirmations", self.status));
        }
        if self.trade_type == TradeType::Donation && self.requester_confirmed {
            return Err("requester confirmed a donation".into());
        }
        let satisfied = self
            .confirmation_rule()
            .is_satisfied(self.requester_confirmed, self.recipient_confirmed);
        if (self.status == TradeStatus::Completed) != (settled && satisfied) {
            return Err("completion does not match confirmations".into());
        }

        match self.history.first().map(|w| &w.witness_type) {
            Some(WitnessType::Request { .. }) => {}
            _ => return Err("history does not start with a request".into()),
        }
        if !self.verify_history() {
            return Err("history chain is broken".into());
        }
        Ok(())
    }

    /// Logs the audit trail
    pub fn view_history(&self) {
        for witness in &self.history {
            tracing::debug!(
                trade_id = %self.id,
                actor = %witness.actor,
                at = %witness.timestamp.to_datetime_utc(),
                "{:?}",
                witness.witness_type
            );
        }
    }

    fn require_status(&self, expected: TradeStatus, action: &'static str) -> Result<(), TradeError> {
        if self.status != expected {
            return Err(TradeError::InvalidState {
                current: self.status,
                action,
            });
        }
        Ok(())
    }

    fn record(
        &mut self,
        actor: &UserId,
        now: &TimeStamp<Utc>,
        witness_type: WitnessType,
    ) -> Result<(), TradeError> {
        let prev_digest = self.history.last().map(Witness::digest).transpose()?;
        self.history.push(Witness::new(
            actor.clone(),
            now.clone(),
            witness_type,
            prev_digest,
        ));
        self.updated_at = now.clone();
        Ok(())
    }
}
