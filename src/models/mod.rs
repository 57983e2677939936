pub mod common;
pub mod engagement;
pub mod payment;
pub mod redemption;
pub mod subscription;
pub mod user;
