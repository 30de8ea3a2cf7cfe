//! Power-source health: battery voltage trend analysis and solar charge
//! controller monitoring.

pub mod battery;
pub mod flags;
pub mod registers;
pub mod solar;
