// SPDX-License-Identifier: MIT
//! Nexus Determination & Liability Engine.
//!
//! A pure, deterministic core for U.S. state/local sales-tax (SALT) nexus
//! analysis: given transaction history, per-jurisdiction rule tables, and
//! physical-nexus declarations, determines for each of the 51 U.S.
//! jurisdictions and each calendar year whether economic or physical
//! nexus was established, when the tax-collection obligation begins, and
//! the resulting taxable exposure, base tax, interest, and penalties.
//!
//! The engine has no I/O of its own. HTTP endpoints, CSV upload/parsing,
//! authentication, persistence, and rendering are external collaborators;
//! see [`engine::compute`] for the core's entry point and `bin/nexus_cli`
//! for a thin file-based caller.

pub mod config;
pub mod engine;
pub mod errors;
pub mod exposure;
pub mod interest;
pub mod jurisdictions;
pub mod nexus;
pub mod rules;
pub mod transactions;

pub use engine::{compute, PhysicalNexusDeclaration, YearRange, YearResult};
pub use errors::{EngineError, RowError, ValidationReport};
pub use rules::RuleRegistry;
pub use transactions::{normalize, RawRow, Transaction};
