pub mod announce;
pub mod listing;
pub mod routes;
