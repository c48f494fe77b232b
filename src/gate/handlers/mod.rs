pub mod health;
pub use self::health::health;

pub mod uploads;
pub use self::uploads::{asset_url, upload_base64, upload_raw};
