pub mod task_api;
pub mod task_resource_client;

pub use task_api::TaskApi;
pub use task_resource_client::TaskResourceClient;
