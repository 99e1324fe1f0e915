pub mod feed;
pub mod store;

pub use feed::spawn_feed_handler;
pub use store::{
    Candle, MarketDataStore, OpeningRange, StoreConfig, SymbolSnapshot, TickUpdate,
};
