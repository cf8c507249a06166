mod backend_directory;
mod hosting_api;
mod observer;
mod status_source;

pub use backend_directory::BackendDirectory;
pub use hosting_api::HostingApi;
pub use observer::{Notice, StatusObserver};
pub use status_source::{StatusChangeHandler, StatusPushSource};
