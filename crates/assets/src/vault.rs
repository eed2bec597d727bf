use std::collections::HashMap;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use basket_common::{ProtocolError, ProtocolResult};

/// One leg of a collateral movement, in raw token units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub token: Address,
    pub from: Address,
    pub to: Address,
    pub amount: u128,
}

impl Transfer {
    /// The same amount moving back.
    pub fn reversed(&self) -> Transfer {
        Transfer {
            from: self.to,
            to: self.from,
            ..*self
        }
    }
}

/// Raw collateral balances per (token, account).
#[derive(Debug, Clone, Default)]
pub struct CollateralVault {
    balances: HashMap<(Address, Address), u128>,
}

impl CollateralVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, token: &Address, account: &Address) -> u128 {
        self.balances
            .get(&(*token, *account))
            .copied()
            .unwrap_or(0)
    }

    /// Credit tokens arriving from outside the protocol.
    pub fn deposit(&mut self, token: Address, account: Address, amount: u128) -> ProtocolResult<()> {
        let balance = self
            .balance_of(&token, &account)
            .checked_add(amount)
            .ok_or(basket_common::MathError::Overflow)?;
        self.balances.insert((token, account), balance);
        Ok(())
    }

    pub fn transfer(&mut self, token: Address, from: Address, to: Address, amount: u128) -> ProtocolResult<()> {
        self.transfer_batch(&[Transfer {
            token,
            from,
            to,
            amount,
        }])
    }

    /// Apply every transfer or none of them.
    pub fn transfer_batch(&mut self, transfers: &[Transfer]) -> ProtocolResult<()> {
        let mut scratch: HashMap<(Address, Address), u128> = HashMap::new();

        for t in transfers {
            let from_key = (t.token, t.from);
            let have = *scratch
                .entry(from_key)
                .or_insert_with(|| self.balance_of(&t.token, &t.from));
            if have < t.amount {
                return Err(ProtocolError::InsufficientBalance {
                    token: t.token,
                    account: t.from,
                    have,
                    need: t.amount,
                });
            }
            scratch.insert(from_key, have - t.amount);

            let to_key = (t.token, t.to);
            let current = *scratch
                .entry(to_key)
                .or_insert_with(|| self.balance_of(&t.token, &t.to));
            let credited = current
                .checked_add(t.amount)
                .ok_or(basket_common::MathError::Overflow)?;
            scratch.insert(to_key, credited);
        }

        self.balances.extend(scratch);
        Ok(())
    }

    /// Undo a batch previously applied with [`transfer_batch`](Self::transfer_batch).
    pub fn revert_batch(&mut self, transfers: &[Transfer]) -> ProtocolResult<()> {
        let reverse: Vec<Transfer> = transfers.iter().rev().map(Transfer::reversed).collect();
        self.transfer_batch(&reverse)
    }
}
