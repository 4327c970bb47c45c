// market-core/src/token.rs

use crate::{types::*, CoreError, CoreResult};
use market_crypto::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Fungible value-transfer service consumed by staking and escrow.
///
/// Every mutating call either applies completely or returns an error and
/// leaves balances and allowances untouched.
pub trait FungibleLedger {
    fn balance_of(&self, owner: &Address) -> Amount;

    fn allowance(&self, owner: &Address, spender: &Address) -> Amount;

    fn total_supply(&self) -> Amount;

    fn transfer(&mut self, from: &Address, to: &Address, amount: &Amount) -> CoreResult<()>;

    /// Set (not increase) the amount `spender` may move out of `owner`
    fn approve(&mut self, owner: &Address, spender: &Address, amount: &Amount) -> CoreResult<()>;

    /// Move `amount` from `from` to `to` on behalf of `spender`, consuming allowance
    fn transfer_from(
        &mut self,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: &Amount,
    ) -> CoreResult<()>;
}

/// Token account state
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub balance: Amount,
    /// Spender -> remaining allowance
    pub allowances: HashMap<Address, Amount>,
}

impl Account {
    pub fn with_balance(balance: Amount) -> Self {
        Self {
            balance,
            allowances: HashMap::new(),
        }
    }

    pub fn allowance(&self, spender: &Address) -> Amount {
        self.allowances.get(spender).cloned().unwrap_or_else(Amount::zero)
    }
}

/// In-memory token ledger with a fixed supply minted to a genesis account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenLedger {
    accounts: HashMap<Address, Account>,
    total_supply: Amount,
}

impl TokenLedger {
    pub fn with_genesis(genesis: Address, supply: Amount) -> Self {
        let mut accounts = HashMap::new();
        accounts.insert(genesis, Account::with_balance(supply.clone()));
        Self {
            accounts,
            total_supply: supply,
        }
    }

    pub fn account(&self, address: &Address) -> Option<&Account> {
        self.accounts.get(address)
    }

    fn ensure_balance(&self, owner: &Address, amount: &Amount) -> CoreResult<()> {
        let available = self.balance_of(owner);
        if available < *amount {
            return Err(CoreError::InsufficientBalance {
                account: *owner,
                required: amount.clone(),
                available,
            });
        }
        Ok(())
    }

    fn move_balance(&mut self, from: &Address, to: &Address, amount: &Amount) -> CoreResult<()> {
        self.ensure_balance(from, amount)?;
        if from == to {
            return Ok(());
        }

        let sender = self.accounts.entry(*from).or_default();
        sender.balance = sender.balance.checked_sub(amount).ok_or_else(|| {
            CoreError::InvalidAmount("balance underflow after check".into())
        })?;
        let receiver = self.accounts.entry(*to).or_default();
        receiver.balance = receiver.balance.clone() + amount.clone();

        Ok(())
    }
}

impl FungibleLedger for TokenLedger {
    fn balance_of(&self, owner: &Address) -> Amount {
        self.accounts
            .get(owner)
            .map(|acc| acc.balance.clone())
            .unwrap_or_else(Amount::zero)
    }

    fn allowance(&self, owner: &Address, spender: &Address) -> Amount {
        self.accounts
            .get(owner)
            .map(|acc| acc.allowance(spender))
            .unwrap_or_else(Amount::zero)
    }

    fn total_supply(&self) -> Amount {
        self.total_supply.clone()
    }

    fn transfer(&mut self, from: &Address, to: &Address, amount: &Amount) -> CoreResult<()> {
        self.move_balance(from, to, amount)?;
        tracing::trace!(%from, %to, %amount, "token transfer");
        Ok(())
    }

    fn approve(&mut self, owner: &Address, spender: &Address, amount: &Amount) -> CoreResult<()> {
        let account = self.accounts.entry(*owner).or_default();
        if amount.is_zero() {
            account.allowances.remove(spender);
        } else {
            account.allowances.insert(*spender, amount.clone());
        }
        tracing::trace!(%owner, %spender, %amount, "allowance set");
        Ok(())
    }

    fn transfer_from(
        &mut self,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: &Amount,
    ) -> CoreResult<()> {
        let allowed = self.allowance(from, spender);
        let remaining = allowed.checked_sub(amount).ok_or_else(|| CoreError::InsufficientAllowance {
            owner: *from,
            spender: *spender,
            required: amount.clone(),
            available: allowed.clone(),
        })?;
        self.move_balance(from, to, amount)?;

        // Balance moved; the allowance update cannot fail
        self.approve(from, spender, &remaining)
    }
}
