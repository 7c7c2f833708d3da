pub mod checkins;
pub mod goals;
pub mod health;
pub mod sweep;
