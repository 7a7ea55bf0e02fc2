pub mod builtin;
pub mod delegation;
pub mod registry;
pub mod request;

pub use delegation::{Delegation, Delegations, ModelDelegation, ToolDelegation};
pub use registry::{ModelRegistry, Registry, ToolRegistry};
pub use request::{GenerateRequest, ToolRequest};
