// Copyright 2026 Audioharvest Contributors
// SPDX-License-Identifier: Apache-2.0

//! Audioharvest runtime library: frame-aware audio asset harvesting.
//!
//! Discovers downloadable audio assets inside a dynamically rendered,
//! authenticated web page (including embedded frames and ephemeral `blob:`
//! handles), filters them by a minimum size threshold, and persists them
//! locally through an ordered chain of download strategies.
//!
//! This library crate exposes the core modules for integration testing.

pub mod cli;
pub mod config;
pub mod error;
pub mod evidence;
pub mod pipeline;
pub mod renderer;
pub mod run;
pub mod session;
pub mod testing;
