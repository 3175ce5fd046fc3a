//! Showrun Core
//!
//! Core types and abstractions for the showrun content production system.
//!
//! This crate contains:
//! - Domain types: Core business entities (Pipeline, Stage, Attribution)
//! - Registry: The fixed stage order and attribution weights
//! - Contract: The handler interface every stage implementation conforms to
//! - DTOs: Data transfer objects for inter-service communication

pub mod contract;
pub mod domain;
pub mod dto;
pub mod registry;
