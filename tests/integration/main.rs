//! Integration tests: the engine wired to an in-memory venue and database.

mod mock_provider;
mod replay;
mod trading_cycle;
