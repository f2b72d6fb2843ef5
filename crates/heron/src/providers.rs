//! Model call gateways. `base` defines the seam the agent loop talks to,
//! `azure` implements it against an Azure OpenAI chat-completions
//! deployment, and `mock` provides a scripted gateway for tests.

pub mod azure;
pub mod base;
pub mod mock;
pub mod utils;
