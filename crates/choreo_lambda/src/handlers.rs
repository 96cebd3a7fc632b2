pub mod choreography;
pub mod direct;
pub mod http;
pub mod pubsub;
