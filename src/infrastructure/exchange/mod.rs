pub mod binance_futures;
pub mod mock;

pub use binance_futures::BinanceFuturesGateway;
pub use mock::MockExchangeGateway;
