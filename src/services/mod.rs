//! Business logic services for the items API.
//!
//! This module contains service layer components that implement
//! core business logic, such as item storage and validation.

pub mod item_service;

// Re-export commonly used types
pub use item_service::ItemService;
