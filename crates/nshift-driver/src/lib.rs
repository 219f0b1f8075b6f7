pub mod asg;
pub mod aws_client;
pub mod container_service;
pub mod credentials;
pub mod db;
pub mod driver;
pub mod error;
pub mod registry;
pub mod time_window;
pub mod vm;

pub use asg::AsgDriver;
pub use aws_client::AwsApiClient;
pub use container_service::ContainerServiceDriver;
pub use credentials::CredentialBroker;
pub use db::DbDriver;
pub use driver::Driver;
pub use error::DriverError;
pub use registry::DriverRegistry;
pub use time_window::in_window;
pub use vm::VmDriver;
