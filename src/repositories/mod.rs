pub mod account;
pub mod backup_code;
pub mod trusted_device;

pub use account::AccountRepository;
pub use backup_code::BackupCodeRepository;
pub use trusted_device::TrustedDeviceRepository;
