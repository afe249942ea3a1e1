pub mod bootstrap;
pub mod market_data;
pub mod position_closer;
pub mod risk_ledger;
pub mod scanner;
pub mod trading_engine;
