pub mod devices;
pub mod health;
pub mod login;
pub mod password_reset;
pub mod register;
pub mod setup;
pub mod token;
pub mod two_factor;

pub use devices::{list_devices, revoke_all_devices, revoke_device};
pub use health::health_check;
pub use login::login;
pub use password_reset::{forgot_password, reset_password};
pub use register::register;
pub use setup::{complete_setup, setup_data};
pub use token::{logout, refresh_token, validate_token};
pub use two_factor::{
    backup_code_count, disable_2fa, regenerate_backup_codes, setup_2fa, verify_2fa,
};
