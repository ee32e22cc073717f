//! Shared fixtures and router-level tests of the whole pipeline.

mod pipeline;
