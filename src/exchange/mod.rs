mod traits;

pub use traits::{AssetCustody, PriceOracle, SwapExecutor};

#[cfg(test)]
pub use traits::{MockAssetCustody, MockPriceOracle, MockSwapExecutor};
