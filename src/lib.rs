//! Reunions Linking Library
//!
//! Linking relationships between map annotations: grouping, geotagging and
//! point selection, stored as W3C Web Annotations in AnnoRepo.
//!
//! # Modules
//!
//! - `annotations`: data model for content and linking annotations
//! - `store`: relationship store trait, AnnoRepo client, in-memory store
//! - `cache`: global relationship cache with progressive loading
//! - `loader`: canvas-scoped loading
//! - `validation`: membership conflict checks
//! - `geotag`: provider search and normalization
//! - `save`: save, delete and cascade orchestration
//! - `routes`: HTTP surface

pub mod annotations;
pub mod cache;
pub mod config;
pub mod error;
pub mod geotag;
pub mod loader;
pub mod routes;
pub mod save;
pub mod state;
pub mod store;
pub mod validation;
