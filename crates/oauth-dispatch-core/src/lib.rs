pub mod config;
pub mod consent;
pub mod credentials;
pub mod db;
pub mod error;
pub mod maintenance;
pub mod password;
pub mod scopes;
pub mod store;
pub mod token;
