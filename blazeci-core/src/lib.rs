//! BlazeCI Core
//!
//! Core types and abstractions for the BlazeCI runner fleet.
//!
//! This crate contains:
//! - Domain types: Core business entities (RepoConfig, RunnerRecord, DemandCounter, ...)
//! - The capacity policy: a pure function from demand to a scaling decision
//! - DTOs: Data transfer objects for the HTTP API

pub mod domain;
pub mod dto;
pub mod policy;
