// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

#![deny(
    clippy::mutable_key_type,
    clippy::map_entry,
    clippy::boxed_local,
    clippy::let_unit_value,
    clippy::redundant_allocation,
    clippy::bool_comparison,
    clippy::bind_instead_of_map,
    clippy::vec_box,
    clippy::while_let_loop,
    clippy::useless_asref,
    clippy::repeat_once,
    clippy::deref_addrof,
    clippy::suspicious_map,
    clippy::single_char_pattern,
    clippy::for_kv_map,
    clippy::let_and_return,
    clippy::iter_nth,
    clippy::iter_cloned_collect,
    clippy::cmp_owned,
    clippy::op_ref
)]

//! Reduces a raw electrical network survey (lines, stations, nodes) into a
//! de-duplicated, topologically consistent graph.
//!
//! The work happens in [`pipeline::Pipeline`], which runs the stages of
//! [`stages`] phase by phase against a [`network::Network`] loaded from any
//! [`store::NetworkStore`].

#[macro_use]
extern crate serde;

pub mod clusters;
pub mod config;
pub mod error;
pub mod geojson_io;
pub mod geometry_utils;
pub mod graph;
pub mod network;
pub mod pipeline;
pub mod spatial_index;
pub mod stages;
pub mod store;


pub use config::PipelineConfig;
pub use error::{ConflictError, ConsistencyError, GeometryError, PipelineError, StageError, StoreError};
pub use network::Network;
pub use pipeline::{Pipeline, PipelineReport};
pub use stages::{Phase, StageId, StageSummary};
