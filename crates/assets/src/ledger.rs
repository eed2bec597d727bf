use std::collections::HashMap;

use alloy_primitives::Address;

use basket_common::{Fix, ProtocolError, ProtocolResult};

/// Mint/burn/balance primitive of the issued token, plus the basket units
/// recorded as backing its supply.
#[derive(Debug, Clone, Default)]
pub struct SupplyLedger {
    balances: HashMap<Address, Fix>,
    total_supply: Fix,
    baskets_needed: Fix,
}

impl SupplyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_supply(&self) -> Fix {
        self.total_supply
    }

    pub fn balance_of(&self, account: &Address) -> Fix {
        self.balances.get(account).copied().unwrap_or_default()
    }

    /// Basket units the protocol owes holders of the current supply.
    pub fn baskets_needed(&self) -> Fix {
        self.baskets_needed
    }

    pub fn mint(&mut self, recipient: Address, amount: Fix) -> ProtocolResult<()> {
        let supply = self.total_supply.checked_add(amount)?;
        let balance = self.balance_of(&recipient).checked_add(amount)?;
        self.total_supply = supply;
        self.balances.insert(recipient, balance);
        Ok(())
    }

    pub fn burn(&mut self, holder: Address, amount: Fix) -> ProtocolResult<()> {
        let have = self.balance_of(&holder);
        if have < amount {
            return Err(ProtocolError::InsufficientSupply {
                account: holder,
                have,
                need: amount,
            });
        }
        let supply = self.total_supply.checked_sub(amount)?;
        self.total_supply = supply;
        self.balances.insert(holder, have.saturating_sub(amount));
        Ok(())
    }

    /// Mint `amount` to `recipient` and record `baskets` more basket units owed.
    /// Nothing changes unless both updates succeed.
    pub fn issue(&mut self, recipient: Address, amount: Fix, baskets: Fix) -> ProtocolResult<()> {
        let needed = self.baskets_needed.checked_add(baskets)?;
        self.mint(recipient, amount)?;
        self.baskets_needed = needed;
        Ok(())
    }

    /// Burn `amount` from `holder` and release `baskets` basket units.
    /// Nothing changes unless both updates succeed.
    pub fn redeem(&mut self, holder: Address, amount: Fix, baskets: Fix) -> ProtocolResult<()> {
        let needed = self.baskets_needed.checked_sub(baskets)?;
        self.burn(holder, amount)?;
        self.baskets_needed = needed;
        Ok(())
    }

    pub fn add_baskets_needed(&mut self, baskets: Fix) -> ProtocolResult<()> {
        self.baskets_needed = self.baskets_needed.checked_add(baskets)?;
        Ok(())
    }

    pub fn sub_baskets_needed(&mut self, baskets: Fix) -> ProtocolResult<()> {
        self.baskets_needed = self.baskets_needed.checked_sub(baskets)?;
        Ok(())
    }
}
