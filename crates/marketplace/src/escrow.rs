// marketplace/src/escrow.rs

use crate::{MarketError, MarketResult};
use market_core::{Amount, AssetId, EventLog, FungibleLedger, JobId, MarketEvent, Timestamp};
use market_crypto::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Payment state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Locked,
    /// Paid to the payee
    Released,
    /// Returned to the payer
    Refunded,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PaymentStatus::Locked => "locked",
            PaymentStatus::Released => "released",
            PaymentStatus::Refunded => "refunded",
        };
        f.write_str(s)
    }
}

/// A price held for one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub job: JobId,
    pub payer: Address,
    pub payee: Address,
    pub amount: Amount,
    pub asset_id: AssetId,
    /// Seconds the payment stays locked
    pub wall_time: Timestamp,
    pub locked_at: Timestamp,
    /// After this the payer may reclaim an unsettled payment
    pub expires_at: Timestamp,
    pub status: PaymentStatus,
}

/// Escrow consumed by the model lifecycle
pub trait PaymentEscrow {
    /// Pull `amount` from `payer` and hold it for `job`
    #[allow(clippy::too_many_arguments)]
    fn lock<L: FungibleLedger>(
        &mut self,
        token: &mut L,
        job: JobId,
        payer: &Address,
        amount: &Amount,
        payee: &Address,
        asset_id: AssetId,
        wall_time: Timestamp,
        now: Timestamp,
    ) -> MarketResult<()>;

    /// Pay the held amount to the payee
    fn release<L: FungibleLedger>(&mut self, token: &mut L, job: &JobId) -> MarketResult<Amount>;

    /// Return the held amount to the payer
    fn refund<L: FungibleLedger>(&mut self, token: &mut L, job: &JobId) -> MarketResult<Amount>;

    fn payment(&self, job: &JobId) -> Option<&Payment>;
}

/// Token-backed escrow. Payers approve `address` before locking.
#[derive(Debug, Clone)]
pub struct Escrow {
    address: Address,
    min_wall_time: Timestamp,
    payments: HashMap<JobId, Payment>,
    events: EventLog,
}

impl Escrow {
    pub fn new(address: Address, min_wall_time: Timestamp) -> Self {
        Self {
            address,
            min_wall_time,
            payments: HashMap::new(),
            events: EventLog::new(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn min_wall_time(&self) -> Timestamp {
        self.min_wall_time
    }

    pub fn drain_events(&mut self) -> Vec<MarketEvent> {
        self.events.drain()
    }

    /// Sum of every payment still locked
    pub fn total_locked(&self) -> Amount {
        self.payments
            .values()
            .filter(|p| p.status == PaymentStatus::Locked)
            .fold(Amount::zero(), |acc, p| acc + p.amount.clone())
    }

    /// Let the payer reclaim a payment nobody settled before it expired
    pub fn refund_expired<L: FungibleLedger>(
        &mut self,
        token: &mut L,
        job: &JobId,
        now: Timestamp,
    ) -> MarketResult<Amount> {
        let payment = self.locked(job)?;
        if now < payment.expires_at {
            return Err(MarketError::EscrowNotExpired { job: *job, expires_at: payment.expires_at });
        }
        self.refund(token, job)
    }

    fn locked(&self, job: &JobId) -> MarketResult<&Payment> {
        let payment = self.payments.get(job).ok_or(MarketError::EscrowNotFound(*job))?;
        if payment.status != PaymentStatus::Locked {
            return Err(MarketError::EscrowNotLocked { job: *job, status: payment.status });
        }
        Ok(payment)
    }

    fn settle<L: FungibleLedger>(
        &mut self,
        token: &mut L,
        job: &JobId,
        to_payee: bool,
    ) -> MarketResult<Amount> {
        let payment = self.locked(job)?;
        let (recipient, amount) = if to_payee {
            (payment.payee, payment.amount.clone())
        } else {
            (payment.payer, payment.amount.clone())
        };

        token.transfer(&self.address, &recipient, &amount)?;

        if let Some(payment) = self.payments.get_mut(job) {
            payment.status = if to_payee {
                PaymentStatus::Released
            } else {
                PaymentStatus::Refunded
            };
        }
        let event = if to_payee {
            MarketEvent::PaymentReleased { job: *job, payee: recipient, amount: amount.clone() }
        } else {
            MarketEvent::PaymentRefunded { job: *job, payer: recipient, amount: amount.clone() }
        };
        tracing::info!(%job, %recipient, %amount, released = to_payee, "payment settled");
        self.events.emit(event);
        Ok(amount)
    }
}

impl PaymentEscrow for Escrow {
    fn lock<L: FungibleLedger>(
        &mut self,
        token: &mut L,
        job: JobId,
        payer: &Address,
        amount: &Amount,
        payee: &Address,
        asset_id: AssetId,
        wall_time: Timestamp,
        now: Timestamp,
    ) -> MarketResult<()> {
        if self.payments.contains_key(&job) {
            return Err(MarketError::EscrowExists(job));
        }
        if amount.is_zero() {
            return Err(MarketError::InvalidAmount(amount.clone()));
        }
        if wall_time < self.min_wall_time {
            return Err(MarketError::WallTimeTooShort {
                min: self.min_wall_time,
                provided: wall_time,
            });
        }

        token.transfer_from(&self.address, payer, &self.address, amount)?;

        self.payments.insert(
            job,
            Payment {
                job,
                payer: *payer,
                payee: *payee,
                amount: amount.clone(),
                asset_id,
                wall_time,
                locked_at: now,
                expires_at: now.saturating_add(wall_time),
                status: PaymentStatus::Locked,
            },
        );

        tracing::info!(%job, %payer, %payee, %amount, wall_time, "payment locked");
        self.events.emit(MarketEvent::PaymentLocked {
            job,
            payer: *payer,
            payee: *payee,
            amount: amount.clone(),
        });
        Ok(())
    }

    fn release<L: FungibleLedger>(&mut self, token: &mut L, job: &JobId) -> MarketResult<Amount> {
        self.settle(token, job, true)
    }

    fn refund<L: FungibleLedger>(&mut self, token: &mut L, job: &JobId) -> MarketResult<Amount> {
        self.settle(token, job, false)
    }

    fn payment(&self, job: &JobId) -> Option<&Payment> {
        self.payments.get(job)
    }
}
