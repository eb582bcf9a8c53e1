//! Launch a single EC2 instance through the launcher backend and follow its
//! lifecycle from launch to running and, on request, to stopped.

pub mod api;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod notify;
pub mod poller;
pub mod render;
pub mod status;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use api::{Ec2Client, InstanceBackend};
pub use error::{ApiError, SessionError, ValidationError};
pub use lifecycle::{Phase, Session, SessionState, Target, Update};
pub use models::{Credentials, InstanceDetails, VmStatus};
