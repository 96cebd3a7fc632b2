pub mod aws;
pub mod dispatch;
pub mod http;
pub mod staging;
