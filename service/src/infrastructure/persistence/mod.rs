pub mod account_repository;
pub mod models;
pub mod transaction_repository;
pub mod user_repository;
