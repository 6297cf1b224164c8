pub mod actor;
pub mod driver;
pub mod location;
pub mod order;
