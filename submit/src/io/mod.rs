//! Side-effecting adapters used by the submission pipeline.

pub mod archive;
pub mod config;
pub mod deadline;
pub mod fetch;
pub mod locks;
pub mod process;
pub mod repo;
pub mod templates;
pub mod validator;
pub mod workspace;
