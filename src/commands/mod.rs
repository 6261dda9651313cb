pub mod audit;
pub mod evaluate;
pub mod index;
pub mod prepare;
pub mod status;
