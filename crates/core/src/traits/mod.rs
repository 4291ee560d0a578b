pub mod clock;
pub mod ecology;
pub mod invoker;
pub mod store;

pub use clock::{Clock, SystemClock};
pub use ecology::{EcologyClient, TaskQueueInspector};
pub use invoker::LabourerInvoker;
pub use store::TableStore;
