//! EC2 API wrapper
//!
//! Wraps the AWS SDK behind the [`Ec2ApiClient`] trait so the provider plugin
//! can be unit tested against an in-memory mock. The concrete client handles
//! credential wiring (static keys or assumed role), endpoint overrides, and
//! pagination; callers see flattened result lists.

pub mod client;
pub mod error;
#[path = "trait.rs"]
pub mod ec2_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::{SdkEc2ClientFactory, MAX_RESULTS_PER_PAGE};
pub use ec2_trait::{AwsApiConfig, Ec2ApiClient, Ec2ClientFactory};
pub use error::AwsError;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockEc2Client, MockEc2ClientFactory};
