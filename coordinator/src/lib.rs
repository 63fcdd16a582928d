//! Hub Manager: a registry of running `HubClient`s plus the fan-in of their
//! `Update` streams, reconciled against a desired set of hub hosts (§4.5).

mod error;
mod hub_manager;

pub use self::error::Error;
pub use self::error::ErrorKind;
pub use self::error::Result;
pub use self::hub_manager::HubManager;
pub use self::hub_manager::RawClientFactory;
pub use self::hub_manager::TaggedUpdate;
