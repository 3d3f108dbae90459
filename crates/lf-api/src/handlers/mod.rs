pub mod health;
pub mod pagination;
pub mod posts;
pub mod search;
