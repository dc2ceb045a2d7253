//! VeilNode core
//!
//! Ephemeral, duress-resistant messaging. Payloads are sealed per message,
//! revealed once and purged on a timer; a second PIN opens a harmless decoy
//! workspace.

pub mod client;
pub mod config;
pub mod core_access;
pub mod core_contacts;
pub mod core_crypto;
pub mod core_messaging;
pub mod core_store;
pub mod errors;
pub mod logging;
pub mod metrics;
pub mod test_utils;

pub use client::{ContactSummary, VeilClient, VeilClientBuilder};
pub use config::Config;
pub use core_access::{LockReason, OperatingMode, SecurityStatus};
pub use errors::{VeilError, VeilResult};
pub use logging::{init_logging, LogLevel};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        // Ensure the main exports are accessible
        let _ = LogLevel::Info;
        assert_eq!(OperatingMode::default(), OperatingMode::Locked);
    }
}
