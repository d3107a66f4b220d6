// Data models
pub mod book;
pub mod cart;
pub mod coupon;
pub mod library;
pub mod social;
pub mod timestamp;
pub mod user;
