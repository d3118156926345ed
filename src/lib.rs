//! filegate - a file lifecycle and access-control engine.
//!
//! Users register files (directly or by URL) and receive unguessable
//! download links. Links stop working when the file expires, is deleted, or
//! its token is rotated. A subscription gate and per-action rate limits
//! bound what each user may do; background workers sweep expired files and
//! remind users of lapsing subscriptions.

pub mod admin;
pub mod config;
pub mod datetime;
pub mod db;
pub mod error;
pub mod file;
pub mod gate;
pub mod logging;
pub mod rate_limit;
pub mod reminder;
pub mod sweeper;

pub use admin::{AdminService, BroadcastReport, PauseToggle};
pub use config::Config;
pub use db::Database;
pub use error::{FilegateError, Result, TokenDenial};
pub use file::{FileService, FileStorage};
pub use gate::{MembershipChecker, SubscriptionGate};
pub use rate_limit::{ActionClass, RateLimiters};
pub use reminder::{Notifier, ReminderService};
pub use sweeper::ExpirySweeper;
