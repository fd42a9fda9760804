// Copyright 2026 Palate Contributors
// SPDX-License-Identifier: Apache-2.0

//! Palate library — restaurant-guide harvester.
//!
//! Collects restaurant metadata and photos from a public restaurant-guide
//! website through a bounded pool of browser-rendering contexts, and
//! normalizes downloaded images to JPEG.

pub mod aggregate;
pub mod cli;
pub mod config;
pub mod convert;
pub mod dispatch;
pub mod events;
pub mod extract;
pub mod fetch;
pub mod http;
pub mod listing;
pub mod pool;
pub mod renderer;
