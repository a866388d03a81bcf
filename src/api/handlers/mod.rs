pub mod errors;
pub mod flows;
pub mod health;
pub mod sessions;
