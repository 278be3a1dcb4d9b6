// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Kaapi Contributors

//! Tool definitions and execution
//!
//! The backend declares exactly one callable tool to the model: the
//! catalog search.

pub mod search;

pub use search::{search_tool, SearchResolver, NO_RESULTS_MESSAGE, SEARCH_TOOL_NAME};
