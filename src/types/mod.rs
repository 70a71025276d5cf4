pub mod events;
pub mod records;
pub mod traits;
pub mod transaction;
