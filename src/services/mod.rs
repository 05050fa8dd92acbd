pub mod auth;
pub mod backup_code;
pub mod email;
pub mod recovery;
pub mod setup_token;
pub mod token;
pub mod totp;
pub mod trusted_device;

pub use auth::{AuthService, LoginAttempt, LoginOutcome};
pub use backup_code::BackupCodeService;
pub use email::EmailService;
pub use recovery::RecoveryService;
pub use setup_token::{SetupPayload, SetupTokenStore};
pub use token::TokenService;
pub use totp::TotpService;
pub use trusted_device::TrustedDeviceService;
