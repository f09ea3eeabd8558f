pub mod audit;
pub mod rent_generation;
pub mod reporting;
pub mod scheduler;
