pub mod backup;
pub mod core;
pub mod notifications;
pub mod outbox;
pub mod permissions;
pub mod requests;
pub mod schedule;
pub mod visibility;
pub mod watchlist;
