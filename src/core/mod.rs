pub mod distributor;
pub mod hub;
pub mod models;
pub mod orchestrator;
pub mod reporter;
pub mod store;

pub use distributor::Distributor;
pub use hub::{FetchCache, Hub, RemoteListing};
pub use models::{FileEntry, Job, JobStatus, JobUpdate, PrefetchRequest};
pub use orchestrator::{JobHandle, Orchestrator};
pub use reporter::StatusView;
pub use store::JobStore;
