//! Lobby exclusivity and expiry under concurrent callers

mod common;

use chrono::{Duration, Utc};
use common::SlowStore;
use fairwager::{
    ledger::EntryReason, CoinSide, Engine, EngineBuilder, EngineError, GameRequest, LobbyState,
    MemoryStore, PlayRequest, RowStore,
};
use std::collections::HashSet;
use std::sync::Arc;

async fn engine() -> Arc<Engine> {
    let engine = EngineBuilder::new()
        .with_store(Arc::new(MemoryStore::new()))
        .build()
        .await
        .expect("engine should boot");
    Arc::new(engine)
}

async fn round_rows(engine: &Engine) -> usize {
    engine.store().scan_prefix(b"round:").await.unwrap().len()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_joiners_exactly_one_wins() {
    for _ in 0..20 {
        let engine = engine().await;
        for owner in ["creator", "joiner_a", "joiner_b"] {
            engine.deposit(owner, 100).await.unwrap();
        }
        let lobby = engine.create_lobby("creator", 100, CoinSide::Heads).await.unwrap();

        let joins: Vec<_> = ["joiner_a", "joiner_b"]
            .into_iter()
            .map(|joiner| {
                let engine = engine.clone();
                let lobby_id = lobby.lobby_id.clone();
                tokio::spawn(async move { (joiner, engine.join_lobby(&lobby_id, joiner).await) })
            })
            .collect();

        let mut winners = Vec::new();
        let mut rejected = Vec::new();
        for join in joins {
            let (joiner, result) = join.await.unwrap();
            match result {
                Ok(result) => winners.push((joiner, result)),
                Err(EngineError::LobbyUnavailable(_)) => rejected.push(joiner),
                Err(other) => panic!("unexpected join error {:?}", other),
            }
        }
        assert_eq!(winners.len(), 1);
        assert_eq!(rejected.len(), 1);

        // The rejected joiner was never debited.
        assert_eq!(engine.balance(rejected[0]).await.unwrap(), 100);
        assert_eq!(engine.ledger().entries(rejected[0]).await.unwrap().len(), 1);

        let (joiner, result) = &winners[0];
        let total = engine.balance("creator").await.unwrap() + engine.balance(joiner).await.unwrap();
        assert_eq!(total, 190);
        assert_eq!(result.payout, 190);
        assert_eq!(round_rows(&engine).await, 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sweep_and_join_never_both_succeed() {
    for _ in 0..20 {
        let engine = engine().await;
        engine.deposit("creator", 50).await.unwrap();
        engine.deposit("joiner", 50).await.unwrap();

        let lobbies = engine.lobbies();
        let now = Utc::now();
        let created = lobbies.create("creator", 50, CoinSide::Tails, now).await.unwrap();
        let after_deadline = now + Duration::minutes(5) + Duration::seconds(1);

        let join = {
            let lobbies = lobbies.clone();
            let id = created.lobby_id.clone();
            tokio::spawn(async move { lobbies.join(&id, "joiner", now).await })
        };
        let sweep = {
            let lobbies = lobbies.clone();
            tokio::spawn(async move { lobbies.sweep(after_deadline).await })
        };

        let joined = join.await.unwrap();
        let swept = sweep.await.unwrap().unwrap();

        let lobby = lobbies.lobby(&created.lobby_id, after_deadline).await.unwrap();
        match joined {
            Ok(_) => {
                assert_eq!(swept, 0);
                assert_eq!(lobby.state, LobbyState::Completed);
                assert_eq!(round_rows(&engine).await, 1);
            }
            Err(EngineError::LobbyUnavailable(_)) => {
                assert_eq!(swept, 1);
                assert_eq!(lobby.state, LobbyState::Expired);
                assert_eq!(engine.balance("creator").await.unwrap(), 50);
                assert_eq!(engine.balance("joiner").await.unwrap(), 50);
                assert_eq!(round_rows(&engine).await, 0);
            }
            Err(other) => panic!("unexpected join error {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_unjoined_lobby_expires_once() {
    let engine = engine().await;
    engine.deposit("creator", 200).await.unwrap();

    let lobbies = engine.lobbies();
    let now = Utc::now();
    let created = lobbies.create("creator", 50, CoinSide::Heads, now).await.unwrap();
    assert_eq!(engine.balance("creator").await.unwrap(), 150);

    // Still joinable right at the deadline.
    let deadline = now + Duration::minutes(5);
    assert_eq!(lobbies.sweep(deadline).await.unwrap(), 0);

    let later = deadline + Duration::seconds(1);
    assert_eq!(lobbies.sweep(later).await.unwrap(), 1);
    assert_eq!(lobbies.sweep(later).await.unwrap(), 0);
    assert!(!lobbies.expire(&created.lobby_id, later).await.unwrap());

    assert_eq!(engine.balance("creator").await.unwrap(), 200);
    let refunds = engine
        .ledger()
        .entries("creator")
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.reason == EntryReason::LobbyRefund)
        .count();
    assert_eq!(refunds, 1);

    let lobby = lobbies.lobby(&created.lobby_id, later).await.unwrap();
    assert_eq!(lobby.state, LobbyState::Expired);
    assert!(lobby.outcome.is_none());
    assert_eq!(round_rows(&engine).await, 0);
    assert!(lobbies.list(later).await.unwrap().is_empty());

    let err = lobbies.join(&created.lobby_id, "someone", later).await.unwrap_err();
    assert!(matches!(err, EngineError::LobbyUnavailable(_)));
}

#[tokio::test]
async fn test_lobby_round_verifies_after_rotation() {
    let engine = engine().await;
    engine.deposit("creator", 100).await.unwrap();
    engine.deposit("joiner", 100).await.unwrap();

    let created = engine.create_lobby("creator", 100, CoinSide::Heads).await.unwrap();
    let listed = engine.list_lobbies().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].side, CoinSide::Heads);

    let result = engine.join_lobby(&created.lobby_id, "joiner").await.unwrap();
    let expected_winner = if result.flip_result == CoinSide::Heads {
        "creator"
    } else {
        "joiner"
    };
    assert_eq!(result.winner_id, expected_winner);
    assert!(engine.list_lobbies().await.unwrap().is_empty());

    engine.rotate().await.unwrap();
    let report = engine.verify_round(&result.round_id).await.unwrap();
    assert!(report.is_valid());
    assert_eq!(report.digest.as_deref(), Some(result.verification.digest.as_str()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_join_shares_nonces_with_own_solo_plays() {
    let engine = EngineBuilder::new()
        .with_store(Arc::new(SlowStore::new(std::time::Duration::from_micros(200))))
        .build()
        .await
        .unwrap();
    let engine = Arc::new(engine);
    engine.deposit("creator", 100).await.unwrap();
    engine.deposit("joiner", 10_000).await.unwrap();
    let lobby = engine.create_lobby("creator", 100, CoinSide::Heads).await.unwrap();

    let plays: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .play(PlayRequest {
                        owner_id: "joiner".to_string(),
                        wager: 10,
                        game: GameRequest::Crate,
                        client_seed_override: None,
                    })
                    .await
                    .map(|r| r.verification.nonce)
            })
        })
        .collect();
    let join = {
        let engine = engine.clone();
        let id = lobby.lobby_id.clone();
        tokio::spawn(async move { engine.join_lobby(&id, "joiner").await })
    };

    let mut nonces = HashSet::new();
    for play in plays {
        assert!(nonces.insert(play.await.unwrap().unwrap()));
    }
    let joined = join.await.unwrap().unwrap();
    assert!(nonces.insert(joined.verification.nonce));
    assert_eq!(nonces, (0..9).collect::<HashSet<u64>>());
}

#[tokio::test]
async fn test_listing_refunds_lapsed_lobbies() {
    let engine = engine().await;
    engine.deposit("creator", 50).await.unwrap();

    let lobbies = engine.lobbies();
    let now = Utc::now();
    let created = lobbies.create("creator", 50, CoinSide::Heads, now).await.unwrap();
    assert_eq!(engine.balance("creator").await.unwrap(), 0);

    assert!(lobbies.list(now + Duration::minutes(10)).await.unwrap().is_empty());
    assert_eq!(engine.balance("creator").await.unwrap(), 50);

    // The stored row changed too, not just the listing.
    let lobby = lobbies.lobby(&created.lobby_id, now).await.unwrap();
    assert_eq!(lobby.state, LobbyState::Expired);
}
