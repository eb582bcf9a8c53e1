//! Launcher backend API.

mod client;

use std::future::Future;

pub use client::{classify_failure, Ec2Client};

use crate::error::ApiError;
use crate::models::{Credentials, InstanceDetails, VmStatus};

/// The three one-shot calls the lifecycle controller makes against the
/// backend. Each call is a single round trip with no retry or caching.
pub trait InstanceBackend: Send + Sync + 'static {
    /// Provision a new instance.
    fn create_instance(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<InstanceDetails, ApiError>> + Send;

    /// Ask the provider to stop an instance.
    fn stop_instance(
        &self,
        credentials: &Credentials,
        instance_id: &str,
    ) -> impl Future<Output = Result<VmStatus, ApiError>> + Send;

    /// Fetch the current state of an instance.
    fn check_status(
        &self,
        credentials: &Credentials,
        instance_id: &str,
    ) -> impl Future<Output = Result<VmStatus, ApiError>> + Send;
}
