pub mod gateway;

pub use gateway::MarketDataGateway;
