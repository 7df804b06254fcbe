//! End-to-end trade scenarios against a real sled database.
use book_exchange::{
    error::TradeError,
    identity::{ReliabilityTier, User},
    registry::Book,
    service::TradeService,
    trade::{AcceptanceDecision, ResponseDecision},
    types::{BookId, TradeStatus, TradeType, UserId},
};
use std::sync::{Arc, Barrier};
use tempfile::{TempDir, tempdir};

// Sled locks its directory, so every test gets its own database under a
// temp dir that is removed on drop.
struct Market {
    _dir: TempDir,
    service: TradeService,
}

fn market() -> anyhow::Result<Market> {
    let dir = tempdir()?;
    let db = sled::open(dir.path().join("market.db"))?;
    let service = TradeService::new(Arc::new(db))?;
    Ok(Market { _dir: dir, service })
}

fn user(service: &TradeService, name: &str) -> anyhow::Result<UserId> {
    let user = User::new(name)?;
    service.users().insert(&user)?;
    Ok(user.id)
}

fn book(service: &TradeService, owner: &UserId, title: &str) -> anyhow::Result<BookId> {
    let book = Book::new(owner.clone(), title, "Anon")?;
    service.books().insert(&book)?;
    Ok(book.id)
}

#[test]
fn swap_proposal_accepted_as_donation() -> anyhow::Result<()> {
    let m = market()?;
    let s = &m.service;
    let requester = user(s, "requester")?;
    let recipient = user(s, "recipient")?;
    let b1 = book(s, &recipient, "Middlemarch")?;
    let b2 = book(s, &requester, "Emma")?;

    let trade = s.create_trade(&requester, &b1, Some(&b2), Some("swap?".into()))?;
    assert_eq!(trade.status(), TradeStatus::Pending);
    assert_eq!(trade.trade_type(), TradeType::Swap);

    let trade = s.accept_trade(trade.id(), &recipient, AcceptanceDecision::Donation)?;
    assert_eq!(trade.trade_type(), TradeType::Donation);
    assert_eq!(trade.recipient_offered_book_id(), None);

    let trade = s.confirm_receipt(trade.id(), &recipient)?;
    assert_eq!(trade.status(), TradeStatus::Completed);
    assert!(trade.recipient_confirmed());
    assert!(!trade.requester_confirmed());

    let b1 = s.books().get_book(&b1)?;
    assert_eq!(b1.owner_id, requester);
    assert!(!b1.available);

    // the original offer was never attached and is untouched
    let b2_after = s.books().get_book(&b2)?;
    assert_eq!(b2_after.owner_id, requester);
    assert!(b2_after.available);
    assert!(s.is_listed(&b2)?);
    assert_eq!(s.holder_of(&b2)?, None);

    assert_eq!(
        s.users().get_user(&requester)?.reliability_tier(),
        ReliabilityTier::Reliable
    );
    assert_eq!(s.users().get_user(&recipient)?.completed_trades, 1);
    Ok(())
}

#[test]
fn donation_proposal_accepted_as_swap() -> anyhow::Result<()> {
    for requester_first in [true, false] {
        let m = market()?;
        let s = &m.service;
        let requester = user(s, "requester")?;
        let recipient = user(s, "recipient")?;
        let b1 = book(s, &recipient, "Beloved")?;
        let b3 = book(s, &recipient, "Jazz")?;

        let trade = s.create_trade(&requester, &b1, None, None)?;
        assert_eq!(trade.trade_type(), TradeType::Donation);

        let trade = s.accept_trade(
            trade.id(),
            &recipient,
            AcceptanceDecision::Swap {
                counter_offer: b3.clone(),
            },
        )?;
        assert_eq!(trade.trade_type(), TradeType::Swap);
        assert_eq!(trade.recipient_offered_book_id(), Some(&b3));
        assert_eq!(s.holder_of(&b3)?.as_ref(), Some(trade.id()));

        let (first, second) = if requester_first {
            (&requester, &recipient)
        } else {
            (&recipient, &requester)
        };
        let trade = s.confirm_receipt(trade.id(), first)?;
        assert_eq!(trade.status(), TradeStatus::Accepted);
        let trade = s.confirm_receipt(trade.id(), second)?;
        assert_eq!(trade.status(), TradeStatus::Completed);

        let b1 = s.books().get_book(&b1)?;
        let b3_after = s.books().get_book(&b3)?;
        assert_eq!(b1.owner_id, requester);
        assert_eq!(b3_after.owner_id, recipient);
        assert!(!b1.available && !b3_after.available);
        assert_eq!(s.holder_of(&b3)?, None);
        assert!(trade.verify_history());
    }
    Ok(())
}

#[test]
fn swap_with_original_offer_moves_it_to_recipient() -> anyhow::Result<()> {
    let m = market()?;
    let s = &m.service;
    let requester = user(s, "requester")?;
    let recipient = user(s, "recipient")?;
    let b1 = book(s, &recipient, "Ulysses")?;
    let b2 = book(s, &requester, "Dubliners")?;
    let b3 = book(s, &recipient, "Finnegans Wake")?;

    let trade = s.create_trade(&requester, &b1, Some(&b2), None)?;
    let trade = s.accept_trade(
        trade.id(),
        &recipient,
        AcceptanceDecision::Swap { counter_offer: b3 },
    )?;
    assert_eq!(s.holder_of(&b2)?.as_ref(), Some(trade.id()));

    s.confirm_receipt(trade.id(), &requester)?;
    s.confirm_receipt(trade.id(), &recipient)?;

    let b2 = s.books().get_book(&b2)?;
    assert_eq!(b2.owner_id, recipient);
    assert!(!b2.available);
    Ok(())
}

#[test]
fn one_offer_made_in_two_trades_goes_to_the_first_swap() -> anyhow::Result<()> {
    let m = market()?;
    let s = &m.service;
    let requester = user(s, "requester")?;
    let ann = user(s, "ann")?;
    let cal = user(s, "cal")?;
    let offered = book(s, &requester, "Orlando")?;
    let ann_wanted = book(s, &ann, "The Waves")?;
    let ann_counter = book(s, &ann, "Flush")?;
    let cal_wanted = book(s, &cal, "Mrs Dalloway")?;
    let cal_counter = book(s, &cal, "Jacob's Room")?;

    let first = s.create_trade(&requester, &ann_wanted, Some(&offered), None)?;
    let second = s.create_trade(&requester, &cal_wanted, Some(&offered), None)?;

    let first = s.accept_trade(
        first.id(),
        &ann,
        AcceptanceDecision::Swap {
            counter_offer: ann_counter,
        },
    )?;
    assert_eq!(first.offered_book_id(), Some(&offered));
    assert_eq!(s.holder_of(&offered)?.as_ref(), Some(first.id()));

    // the offer is taken, but cal's own counter-offer still makes a swap
    let second = s.accept_trade(
        second.id(),
        &cal,
        AcceptanceDecision::Swap {
            counter_offer: cal_counter.clone(),
        },
    )?;
    assert_eq!(second.status(), TradeStatus::Accepted);
    assert_eq!(second.offered_book_id(), None);
    assert_eq!(s.holder_of(&cal_counter)?.as_ref(), Some(second.id()));
    assert_eq!(s.holder_of(&offered)?.as_ref(), Some(first.id()));

    for trade in [&first, &second] {
        s.confirm_receipt(trade.id(), &requester)?;
    }
    s.confirm_receipt(first.id(), &ann)?;
    s.confirm_receipt(second.id(), &cal)?;

    assert_eq!(s.books().get_book(&offered)?.owner_id, ann);
    assert_eq!(s.books().get_book(&cal_wanted)?.owner_id, requester);
    Ok(())
}

#[test]
fn cancelled_trade_rejects_every_followup() -> anyhow::Result<()> {
    let m = market()?;
    let s = &m.service;
    let requester = user(s, "requester")?;
    let recipient = user(s, "recipient")?;
    let b1 = book(s, &recipient, "Walden")?;

    let trade = s.create_trade(&requester, &b1, None, None)?;
    assert!(!s.is_listed(&b1)?);

    let trade = s.cancel_trade(trade.id(), &requester)?;
    assert_eq!(trade.status(), TradeStatus::Cancelled);
    assert!(s.is_listed(&b1)?);

    let accept = s.accept_trade(trade.id(), &recipient, AcceptanceDecision::Donation);
    let reject = s.reject_trade(trade.id(), &recipient);
    let confirm = s.confirm_receipt(trade.id(), &recipient);
    for result in [accept, reject, confirm] {
        assert!(matches!(result, Err(TradeError::InvalidState { .. })));
    }
    assert_eq!(s.trade(trade.id())?.status(), TradeStatus::Cancelled);
    Ok(())
}

#[test]
fn concurrent_accepts_have_one_winner() -> anyhow::Result<()> {
    let m = market()?;
    let s = &m.service;
    let requester = user(s, "requester")?;
    let recipient = user(s, "recipient")?;
    let b1 = book(s, &recipient, "Dracula")?;
    let trade = s.create_trade(&requester, &b1, None, None)?;

    let barrier = Barrier::new(2);
    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let (barrier, trade, recipient) = (&barrier, &trade, &recipient);
                scope.spawn(move || {
                    barrier.wait();
                    s.respond_to_trade(
                        trade.id(),
                        &recipient,
                        ResponseDecision::Accept(AcceptanceDecision::Donation),
                    )
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    for result in &results {
        if let Err(e) = result {
            assert!(matches!(
                e,
                TradeError::InvalidState { .. } | TradeError::Conflict(_)
            ));
        }
    }
    // exactly one accept witness was recorded
    assert_eq!(s.trade(trade.id())?.history().len(), 2);
    Ok(())
}

#[test]
fn concurrent_counter_offers_of_one_book_have_one_winner() -> anyhow::Result<()> {
    let m = market()?;
    let s = &m.service;
    let alice = user(s, "alice")?;
    let carol = user(s, "carol")?;
    let owner = user(s, "owner")?;
    let wanted_a = book(s, &owner, "Persuasion")?;
    let wanted_b = book(s, &owner, "Sanditon")?;
    let counter = book(s, &owner, "Lady Susan")?;

    let t1 = s.create_trade(&alice, &wanted_a, None, None)?;
    let t2 = s.create_trade(&carol, &wanted_b, None, None)?;

    let barrier = Barrier::new(2);
    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = [t1.id(), t2.id()]
            .into_iter()
            .map(|id| {
                let barrier = &barrier;
                let counter = counter.clone();
                let owner = &owner;
                scope.spawn(move || {
                    barrier.wait();
                    s.accept_trade(
                        id,
                        owner,
                        AcceptanceDecision::Swap {
                            counter_offer: counter,
                        },
                    )
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .any(|r| matches!(r, Err(TradeError::Conflict(_))))
    );
    Ok(())
}

#[test]
fn concurrent_requests_for_one_book_have_one_winner() -> anyhow::Result<()> {
    let m = market()?;
    let s = &m.service;
    let owner = user(s, "owner")?;
    let b1 = book(s, &owner, "Hamlet")?;
    let requesters = [user(s, "r1")?, user(s, "r2")?, user(s, "r3")?];

    let barrier = Barrier::new(requesters.len());
    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = requesters
            .iter()
            .map(|requester| {
                let barrier = &barrier;
                let b1 = &b1;
                scope.spawn(move || {
                    barrier.wait();
                    s.create_trade(requester, b1, None, None)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(TradeError::Conflict(_))))
            .count(),
        2
    );
    Ok(())
}

#[test]
fn trades_survive_reopen() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("reopen.db");

    let (trade_id, requester) = {
        let service = TradeService::new(Arc::new(sled::open(&path)?))?;
        let requester = user(&service, "requester")?;
        let recipient = user(&service, "recipient")?;
        let b1 = book(&service, &recipient, "Kindred")?;
        let trade = service.create_trade(&requester, &b1, None, None)?;
        service.flush()?;
        (trade.id().clone(), requester)
    };

    let service = TradeService::new(Arc::new(sled::open(&path)?))?;
    let trade = service.get_trade(&trade_id, &requester)?;
    assert_eq!(trade.status(), TradeStatus::Pending);
    assert!(trade.check_invariants().is_ok());
    Ok(())
}
