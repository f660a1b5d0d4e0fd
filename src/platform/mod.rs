pub mod loader;
pub mod memory;
pub mod sim;
pub mod viewer;

pub use loader::{LoadError, LoadRequest, LoadStatus, LoadType, ViewerLoader};
pub use memory::{max_viewers_for_memory, FixedMemory, MemoryInfo, SystemMemory};
pub use sim::{LoadRecord, SimulatedLoader};
pub use viewer::{ContentViewer, Teardown, TeardownToken, ViewerId};
