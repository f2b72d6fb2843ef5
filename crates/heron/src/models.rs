//! The objects passed around by the agent: conversation messages on one
//! side, tool definitions and tool-call requests on the other. The wire
//! formats of the model endpoint and the tool server are close cousins of
//! these structs but not identical; conversion lives in `providers::utils`
//! and `catalog` so the rest of the crate only ever sees these types.

pub mod message;
pub mod tool;
