pub mod auth;
pub mod platforms;
pub mod query;
