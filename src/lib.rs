//! EatFit24 Photo Batch Analysis
//!
//! This library provides the client-side engine that submits batches of food
//! photos to the EatFit24 recognition backend, polls asynchronous recognition
//! tasks, compensates for eventual consistency, and aggregates per-photo
//! results for presentation.

pub mod app_state;
pub mod config;
pub mod models;
pub mod services;
