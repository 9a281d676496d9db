pub mod api;
pub mod billing;
pub mod captions;
pub mod config;
pub mod humanize;
pub mod ledger;
pub mod lifecycle;
pub mod metering;
pub mod observability;
pub mod pipeline;
pub mod storage;
