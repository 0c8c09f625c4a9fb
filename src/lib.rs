pub mod banner;
pub mod bridge;
pub mod client;
pub mod consts;
pub mod demo;
pub mod error;
pub mod events;
pub mod host;
pub mod journal;
pub mod logging;
pub mod skills;
