pub mod checkin;
pub mod goal;
pub mod miss_marker;
