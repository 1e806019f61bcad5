#![doc = "mdbatch-core: core logic library for mdbatch."]

//! This crate contains the settings resolution, discovery and build pipeline
//! behind the `mdbatch` binary, plus the default rendering engine.
//! It never reads the process environment; callers capture it and pass it in.
//!
//! # Usage
//! Resolve [`config::Settings`] with [`config::resolve_settings`], then run a
//! [`build::Build`] with an engine factory such as [`render::HtmlPdfEngine::new`].

pub mod assets;
pub mod build;
pub mod config;
pub mod contract;
pub mod discover;
pub mod render;
pub mod sandbox;
