//! Payment event processing and reconciliation engine.
//!
//! Ingests signed gateway webhooks, drives each order's or subscription's
//! payment through its lifecycle, fans out durable side effects through a
//! retry queue, runs scheduled retry and escalation jobs, and reconciles the
//! internal ledger against the gateway.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
pub mod workers;
