pub mod larson;
pub mod micro;
pub mod threads;
