//! marketplace-sync - Marketplace catalog and order synchronization engine
//!
//! This crate ingests product, offer, and order data from a third-party
//! marketplace API (two seller accounts, MAIN and FBE) into a local
//! SQLite store, under strict per-endpoint request-rate ceilings and
//! with per-record failure isolation.

pub mod client;
pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod sync;
