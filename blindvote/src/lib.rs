#[macro_use]
extern crate serde;

mod ballot;
mod blind;
mod candidate;
mod config;
mod eligibility;
mod error;
mod field;
mod keys;
mod request;
mod serde_hex;
mod service;
mod session;
mod store;
mod tally;
mod voter;

pub use ballot::*;
pub use blind::*;
pub use candidate::*;
pub use config::*;
pub use eligibility::*;
pub use error::*;
pub use field::*;
pub use keys::*;
pub use request::*;
pub use serde_hex::*;
pub use service::*;
pub use session::*;
pub use store::*;
pub use tally::*;
pub use voter::*;
