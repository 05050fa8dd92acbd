pub mod account;
pub mod trusted_device;

pub use account::{Account, AccountStatus, Role};
pub use trusted_device::TrustedDevice;
