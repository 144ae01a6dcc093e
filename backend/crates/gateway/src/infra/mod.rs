pub mod subscription_client;
pub mod upstream;

pub use subscription_client::HttpSubscriptionClient;
pub use upstream::UpstreamClient;
