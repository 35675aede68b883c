//! FlowForge Core
//!
//! Core types and abstractions for the FlowForge CI/CD control plane.
//!
//! This crate contains:
//! - Domain types: Core business entities (Project, Pipeline, PipelineRun, etc.)
//! - DTOs: Data transfer objects used by the persistence gateway and callers
//! - The declarative pipeline spec document and its parser

pub mod domain;
pub mod dto;
pub mod spec;
