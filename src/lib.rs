//! Biodiversity survey collector: pulls field GeoPackage uploads from a
//! shared Drive folder, reconciles observer/species metadata and merges
//! them into one deduplicated main dataset.

pub mod app;
pub mod config;
pub mod diagnose;
pub mod domain;
pub mod drive;
pub mod error;
pub mod geom;
pub mod gpkg;
pub mod output;
pub mod pipeline;
pub mod reconcile;
pub mod runlog;
pub mod schema;
pub mod snapshot;
pub mod store;
