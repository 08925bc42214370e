//! Cross-module tests for the recovery framework
//!
//! Unit tests live next to each module; these exercise complete flows.
