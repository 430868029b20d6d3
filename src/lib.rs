//! Telegram bot that reports app-store changes from a shared changes log.
//!
//! Allow-listed users ask for `/stats <from> <to>` and get a donut chart plus
//! per-category counts; the administrator manages the allow-list.

pub mod access;
pub mod bot;
pub mod chart;
pub mod config;
pub mod dates;
pub mod error;
pub mod health;
pub mod log_store;
pub mod models;
pub mod projections;
pub mod router;
pub mod sheets;
pub mod telegram;
