pub mod counter;
pub mod gauge;
