//! Inkpost - blog content-management backend
//!
//! Connection management, listing queries and health probes for the blog
//! admin, served over axum.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod health;
pub mod models;
pub mod services;
