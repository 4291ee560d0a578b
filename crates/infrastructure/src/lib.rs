pub mod invoker;
pub mod store;

pub use invoker::HttpLabourerInvoker;
pub use store::*;
