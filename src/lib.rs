pub mod config;
pub mod export;
pub mod fetch;
pub mod plot;
pub mod reference;
pub mod report;
pub mod series;
pub mod server;
