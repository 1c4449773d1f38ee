#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core types for cpay.
//!
//! This crate provides the foundational types shared by every cpay component:
//! the merchant's static options and their validation, per-order payment
//! metadata, verification results, and the traits that chain-specific crates
//! implement to talk to the blockchain and to sign transactions.
//!
//! It deliberately knows nothing about HTTP or key storage. Concrete
//! collaborators live in separate crates (see `cpay-chain-bitcoin`).
//!
//! # Modules
//!
//! - [`chain`] - Chain data provider trait, transaction model, fee rates
//! - [`config`] - Payment options, wallet and auto-sweep settings, validation
//! - [`converter`] - Fiat-to-asset converter registry
//! - [`engine`] - Key derivation and transaction engine trait, policy violations
//! - [`metadata`] - Ordered, case-insensitive payment metadata
//! - [`network`] - Bitcoin network selector
//! - [`proto`] - Verification results and argument errors
//! - [`util`] - Helper types (money amounts)
//!
//! # Feature Flags
//!
//! - `telemetry` - Emits a `tracing` event when payment options fail validation

pub mod chain;
pub mod config;
pub mod converter;
pub mod engine;
pub mod metadata;
pub mod network;
pub mod proto;
pub mod util;
