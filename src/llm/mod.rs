pub mod provider;
pub mod providers;
pub mod response_parser;
pub mod retry;
pub mod tools;
pub mod types;
