//! Cross-module integration tests: whole cycles through the orchestrator
//! with in-memory collaborators.

mod mocks;
mod scenarios;
