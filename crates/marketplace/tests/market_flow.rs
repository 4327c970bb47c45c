use market_core::{Amount, MarketEvent, PoolKind, StakeScope};
use market_crypto::{commitment_of, Address, Hash, Salt, Secret};
use marketplace::{Market, MarketConfig, MarketError, ModelStatus, ModelVerdict, PaymentStatus};
use proptest::prelude::*;
use staking::{SessionStatus, StakingError};

const VERIFIERS: usize = 5;
const GOSSIPERS: usize = 3;

struct Fixture {
    market: Market,
    scientist: Address,
    owner: Address,
    verifiers: Vec<Address>,
    gossipers: Vec<Address>,
    model_id: Hash,
    asset_id: Hash,
}

fn fund(market: &mut Market, who: &Address, amount: u64) {
    let genesis = market.config().token.genesis_account;
    market.transfer(&genesis, who, &Amount::from_u64(amount)).unwrap();
}

fn keys(who: &Address) -> (Secret, Salt) {
    let bytes = who.as_bytes();
    let mut secret = [0u8; 32];
    secret[..20].copy_from_slice(&bytes[..20]);
    let mut salt = [0x5Au8; 32];
    salt[0] = bytes[0];
    salt[1] = !bytes[0];
    (Secret::new(secret), Salt::new(salt).unwrap())
}

fn fixture() -> Fixture {
    let mut market = Market::new(MarketConfig::default()).unwrap();
    let custody = market.custody_address();

    let register = |market: &mut Market, kind: PoolKind, n: usize| -> Vec<Address> {
        (0..n)
            .map(|i| {
                let a = Address::from_name(&format!("{}-{}", kind, i));
                fund(market, &a, 1_000);
                market.approve(&a, &custody, &Amount::from_u64(100)).unwrap();
                market.register(kind, &a, &Amount::from_u64(50), 2).unwrap();
                a
            })
            .collect()
    };
    let verifiers = register(&mut market, PoolKind::Verifiers, VERIFIERS);
    let gossipers = register(&mut market, PoolKind::Gossipers, GOSSIPERS);

    let scientist = Address::from_name("data-scientist");
    let owner = Address::from_name("data-owner");
    fund(&mut market, &scientist, 400);
    fund(&mut market, &owner, 400);

    Fixture {
        market,
        scientist,
        owner,
        verifiers,
        gossipers,
        model_id: Hash::of_label("randomModelId"),
        asset_id: Hash::of_label("randomDataAssetId"),
    }
}

impl Fixture {
    fn lock_payment(&mut self, now: u64) {
        let escrow = self.market.escrow_address();
        self.market.approve(&self.scientist, &escrow, &Amount::from_u64(100)).unwrap();
        self.market
            .lock_payment(&self.scientist, self.model_id, &Amount::from_u64(100), &self.owner, self.asset_id, 3_600, now)
            .unwrap();
    }

    fn create_model(&mut self, now: u64) {
        let custody = self.market.custody_address();
        self.market.approve(&self.owner, &custody, &Amount::from_u64(100)).unwrap();
        self.market.create_model(&self.owner, self.model_id, self.asset_id, 3, 1, now).unwrap();
    }

    fn commit(&mut self, kind: PoolKind, who: &[Address], now: u64) {
        for a in who {
            let (secret, salt) = keys(a);
            self.market
                .submit_commitment(kind, &self.model_id, a, commitment_of(&secret, &salt), now)
                .unwrap();
        }
    }

    fn reveal(&mut self, kind: PoolKind, who: &[Address], now: u64) {
        for a in who {
            let (secret, salt) = keys(a);
            self.market.submit_reveal(kind, &self.model_id, a, secret, salt, now).unwrap();
        }
    }

    /// Lock, create and open both sessions at t=10
    fn forming(&mut self) {
        self.lock_payment(0);
        self.create_model(1);
        let (v, g) = self.market.form_committees(&self.model_id, 10).unwrap();
        assert_eq!(v.len(), VERIFIERS);
        assert_eq!(g.len(), GOSSIPERS);
    }

    /// Everyone commits and reveals; both committees are ready at t=32
    fn play_all(&mut self) {
        let (v, g) = (self.verifiers.clone(), self.gossipers.clone());
        self.commit(PoolKind::Verifiers, &v, 11);
        self.commit(PoolKind::Gossipers, &g, 11);
        self.reveal(PoolKind::Verifiers, &v, 12);
        self.reveal(PoolKind::Gossipers, &g, 31);
    }
}

#[test]
fn test_lock_payment_moves_price_into_escrow() {
    let mut f = fixture();
    f.lock_payment(0);

    assert_eq!(f.market.balance_of(&f.scientist), Amount::from_u64(300));
    let payment = f.market.payment(&f.model_id).unwrap();
    assert_eq!(payment.status, PaymentStatus::Locked);
    assert_eq!(payment.payee, f.owner);
    assert!(f.market.check_invariants());
}

#[test]
fn test_create_model_locks_owner_stake() {
    let mut f = fixture();
    f.create_model(0);

    let model = f.market.model(&f.model_id).unwrap();
    assert_eq!(model.status, ModelStatus::Created);
    assert_eq!(model.data_asset_id, f.asset_id);
    assert_eq!(f.market.balance_of(&f.owner), Amount::from_u64(300));
    assert_eq!(
        f.market.stake_ledger().staked_amount(&f.owner, StakeScope::Model(f.model_id)),
        Amount::from_u64(100)
    );
    assert!(f
        .market
        .events()
        .iter()
        .any(|e| matches!(e, MarketEvent::ModelCreated { model_id, .. } if *model_id == f.model_id)));
}

#[test]
fn test_full_lifecycle_releases_payment() {
    let mut f = fixture();
    f.forming();
    f.play_all();

    assert_eq!(f.market.try_activate(&f.model_id, 32).unwrap(), ModelStatus::InProgress);
    let verifiers = f.market.committee_of(PoolKind::Verifiers, &f.model_id).unwrap().clone();
    let gossipers = f.market.committee_of(PoolKind::Gossipers, &f.model_id).unwrap().clone();
    assert_eq!(verifiers.size(), VERIFIERS);
    assert_eq!(gossipers.size(), GOSSIPERS);

    let cheat = verifiers.members[0];
    let mut verdict = ModelVerdict::accepted();
    verdict.dishonest_verifiers.insert(cheat);
    let resolution = f.market.resolve_model(&f.model_id, &verdict).unwrap();

    assert_eq!(resolution.payment, Some(PaymentStatus::Released));
    assert_eq!(resolution.verifiers.slashed.len(), 1);
    assert_eq!(resolution.verifiers.released.len(), VERIFIERS - 1);
    assert_eq!(resolution.owner_refund, Amount::from_u64(100));
    // 300 left after staking, plus the price, plus the stake back
    assert_eq!(f.market.balance_of(&f.owner), Amount::from_u64(500));
    assert_eq!(
        f.market.stake_ledger().staked_amount(&cheat, StakeScope::Pool(PoolKind::Verifiers)),
        Amount::from_u64(50)
    );
    assert!(!f.market.balance_of(&f.market.config().treasury).is_zero());
    assert_eq!(f.market.model(&f.model_id).unwrap().status, ModelStatus::Finalized);
    assert!(f.market.check_invariants());
}

#[test]
fn test_rejected_model_refunds_scientist() {
    let mut f = fixture();
    f.forming();
    f.play_all();
    f.market.try_activate(&f.model_id, 32).unwrap();

    let resolution = f.market.resolve_model(&f.model_id, &ModelVerdict::rejected()).unwrap();
    assert_eq!(resolution.payment, Some(PaymentStatus::Refunded));
    assert_eq!(f.market.balance_of(&f.scientist), Amount::from_u64(400));
    for a in f.verifiers.iter().chain(&f.gossipers) {
        assert_eq!(f.market.balance_of(a), Amount::from_u64(900));
    }
    assert!(f.market.check_invariants());
}

#[test]
fn test_activation_waits_for_reveal_phase() {
    let mut f = fixture();
    f.forming();
    let v = f.verifiers.clone();
    f.commit(PoolKind::Verifiers, &v, 11);

    assert_eq!(f.market.try_activate(&f.model_id, 12).unwrap(), ModelStatus::CommitteeForming);
    assert_eq!(f.market.session_status(PoolKind::Verifiers, &f.model_id), Some(SessionStatus::Revealing));
}

#[test]
fn test_silent_verifiers_are_slashed_and_round_retried() {
    let mut f = fixture();
    f.forming();
    let (v, g) = (f.verifiers.clone(), f.gossipers.clone());
    f.commit(PoolKind::Verifiers, &v, 11);
    f.reveal(PoolKind::Verifiers, &v[..2], 12);
    f.commit(PoolKind::Gossipers, &g, 11);
    f.reveal(PoolKind::Gossipers, &g, 31);

    // verifier reveal deadline is t=50; two reveals are below min_k of 3
    assert_eq!(f.market.poll(PoolKind::Verifiers, &f.model_id, 50).unwrap(), SessionStatus::Aborted);
    for a in &v[2..] {
        assert_eq!(
            f.market.stake_ledger().staked_amount(a, StakeScope::Pool(PoolKind::Verifiers)),
            Amount::from_u64(50)
        );
    }
    assert_eq!(f.market.eligible_set(PoolKind::Verifiers).len(), VERIFIERS);

    // silent verifiers keep one slot each and stay eligible, so a second round opens
    assert_eq!(f.market.try_activate(&f.model_id, 51).unwrap(), ModelStatus::CommitteeForming);
    let model = f.market.model(&f.model_id).unwrap();
    assert_eq!(model.verifier_rounds, 2);
    assert_eq!(f.market.session_status(PoolKind::Verifiers, &f.model_id), Some(SessionStatus::Collecting));
    assert!(f.market.check_invariants());
}

#[test]
fn test_owner_cancels_and_everyone_is_made_whole() {
    let mut f = fixture();
    f.forming();

    let stranger = Address::from_name("stranger");
    let err = f.market.cancel_model(&stranger, &f.model_id).unwrap_err();
    assert!(matches!(err, MarketError::Unauthorized { .. }));

    let owner = f.owner;
    f.market.cancel_model(&owner, &f.model_id).unwrap();

    assert_eq!(f.market.model(&f.model_id).unwrap().status, ModelStatus::Cancelled);
    assert_eq!(f.market.balance_of(&f.owner), Amount::from_u64(400));
    assert_eq!(f.market.balance_of(&f.scientist), Amount::from_u64(400));
    for a in f.verifiers.clone() {
        assert_eq!(f.market.stake_ledger().free_slots(&a, StakeScope::Pool(PoolKind::Verifiers)), 2);
        f.market.deregister_verifier(&a).unwrap();
        assert_eq!(f.market.balance_of(&a), Amount::from_u64(1_000));
    }
    assert!(f.market.check_invariants());
}

#[test]
fn test_gossiper_deregistration_blocked_while_committed() {
    let mut f = fixture();
    f.forming();

    let g = f.gossipers[0];
    let err = f.market.deregister_gossiper(&g).unwrap_err();
    assert!(matches!(err, MarketError::Staking(StakingError::ActiveCommitment { .. })));
    assert!(f.market.is_registered_gossiper(&g));
}

#[test]
fn test_expired_payment_refund() {
    let mut f = fixture();
    f.lock_payment(0);

    assert!(matches!(
        f.market.refund_expired_payment(&f.model_id, 3_599),
        Err(MarketError::EscrowNotExpired { .. })
    ));
    assert_eq!(f.market.refund_expired_payment(&f.model_id, 3_600).unwrap(), Amount::from_u64(100));
    assert_eq!(f.market.balance_of(&f.scientist), Amount::from_u64(400));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// However many verifiers stay silent, the round ends in a committee or
    /// a clean abort and custody always matches the stake records
    #[test]
    fn prop_silent_verifiers_keep_books_balanced(silent in 0usize..=VERIFIERS) {
        let mut f = fixture();
        f.forming();
        let (v, g) = (f.verifiers.clone(), f.gossipers.clone());
        f.commit(PoolKind::Verifiers, &v, 11);
        f.reveal(PoolKind::Verifiers, &v[silent..], 12);
        f.commit(PoolKind::Gossipers, &g, 11);
        f.reveal(PoolKind::Gossipers, &g, 31);

        let status = f.market.poll(PoolKind::Verifiers, &f.model_id, 50).unwrap();
        let revealed = VERIFIERS - silent;
        if revealed >= 3 {
            prop_assert_eq!(status, SessionStatus::Finalized);
            prop_assert_eq!(f.market.try_activate(&f.model_id, 51).unwrap(), ModelStatus::InProgress);
            prop_assert_eq!(
                f.market.committee_of(PoolKind::Verifiers, &f.model_id).unwrap().size(),
                revealed
            );
        } else {
            prop_assert_eq!(status, SessionStatus::Aborted);
        }
        prop_assert!(f.market.check_invariants());
        prop_assert!(f.market.stake_ledger().check_invariants());
    }
}
