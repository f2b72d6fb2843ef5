//! Heron connects a hosted chat-completions deployment to a remote tool
//! server and runs the conversation loop between them: the model decides
//! which tools to call, heron dispatches the calls with the right bearer
//! credential for each leg, and the loop continues until the model settles
//! on a plain answer.

pub mod agent;
pub mod catalog;
pub mod config;
pub mod credentials;
pub mod errors;
pub mod models;
pub mod providers;
pub mod session;
