//! Core engine: discovery, ranking, dispatch and the cycle loop that ties
//! them together.

pub mod dispatcher;
pub mod orchestrator;
pub mod ranker;
pub mod scanner;
