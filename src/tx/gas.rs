//! Gas limit and fee buffering, and the resulting cost estimate

use ethers::types::U256;
use tracing::debug;

/// Gas price types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasPrice {
    Legacy(U256),
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

impl GasPrice {
    /// Highest price per gas the transaction may pay
    pub fn ceiling(&self) -> U256 {
        match self {
            GasPrice::Legacy(price) => *price,
            GasPrice::Eip1559 {
                max_fee_per_gas, ..
            } => *max_fee_per_gas,
        }
    }
}

/// Predicted resource cost of a prepared transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasEstimate {
    pub gas_limit: U256,
    pub gas_price: GasPrice,
    /// Worst-case fee in wei (`gas_limit * ceiling price`)
    pub total_cost: U256,
}

impl GasEstimate {
    pub fn new(gas_limit: U256, gas_price: GasPrice) -> Self {
        Self {
            gas_limit,
            gas_price,
            total_cost: GasEstimator::calculate_cost(gas_limit, &gas_price),
        }
    }
}

/// Applies safety buffers to node-provided gas figures
#[derive(Debug, Clone)]
pub struct GasEstimator {
    /// Buffer percentage for gas limit (e.g., 20 = 20% buffer)
    gas_limit_buffer_percent: u64,
    /// Buffer percentage for gas price
    gas_price_buffer_percent: u64,
}

impl GasEstimator {
    pub fn new(gas_limit_buffer_percent: u64, gas_price_buffer_percent: u64) -> Self {
        Self {
            gas_limit_buffer_percent,
            gas_price_buffer_percent,
        }
    }

    /// Pad a node's `eth_estimateGas` answer
    pub fn buffered_gas_limit(&self, estimated: U256) -> U256 {
        estimated + estimated * self.gas_limit_buffer_percent / 100
    }

    /// Pad a gas price so the transaction survives small fee moves
    pub fn buffered_price(&self, gas_price: GasPrice) -> GasPrice {
        let buffered = match gas_price {
            GasPrice::Legacy(price) => {
                GasPrice::Legacy(price + price * self.gas_price_buffer_percent / 100)
            }
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => GasPrice::Eip1559 {
                max_fee_per_gas: max_fee_per_gas
                    + max_fee_per_gas * self.gas_price_buffer_percent / 100,
                max_priority_fee_per_gas: max_priority_fee_per_gas
                    + max_priority_fee_per_gas * self.gas_price_buffer_percent / 100,
            },
        };

        debug!("Buffered gas price: {:?}", buffered);
        buffered
    }

    /// Calculate total cost in wei
    pub fn calculate_cost(gas_limit: U256, gas_price: &GasPrice) -> U256 {
        gas_limit * gas_price.ceiling()
    }
}

impl Default for GasEstimator {
    fn default() -> Self {
        Self::new(20, 10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffers_apply_percentages() {
        let estimator = GasEstimator::default();
        assert_eq!(
            estimator.buffered_gas_limit(U256::from(50_000)),
            U256::from(60_000)
        );

        let price = estimator.buffered_price(GasPrice::Eip1559 {
            max_fee_per_gas: U256::from(30_000_000_000u64),
            max_priority_fee_per_gas: U256::from(2_000_000_000u64),
        });
        assert_eq!(
            price,
            GasPrice::Eip1559 {
                max_fee_per_gas: U256::from(33_000_000_000u64),
                max_priority_fee_per_gas: U256::from(2_200_000_000u64),
            }
        );
    }

    #[test]
    fn test_cost_uses_max_fee() {
        let estimate = GasEstimate::new(
            U256::from(60_000),
            GasPrice::Eip1559 {
                max_fee_per_gas: U256::from(10),
                max_priority_fee_per_gas: U256::from(1),
            },
        );
        assert_eq!(estimate.total_cost, U256::from(600_000));
    }
}
