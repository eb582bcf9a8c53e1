//! Test fixtures shared by unit and scenario tests.
//!
//! `ScriptedBackend` answers each call from a queue of canned results. When a
//! queue runs dry the call never completes, like a backend that hangs.
//!
//! Only built for this crate's tests or with the `testing` feature.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::api::InstanceBackend;
use crate::error::{ApiError, ErrorPayload};
use crate::models::{Credentials, InstanceDetails, VmStatus};

/// A call observed by [`ScriptedBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create { client_id: String },
    Stop { instance_id: String },
    Status { instance_id: String },
}

#[derive(Default)]
pub struct ScriptedBackend {
    create: Mutex<VecDeque<Result<InstanceDetails, ApiError>>>,
    stop: Mutex<VecDeque<Result<VmStatus, ApiError>>>,
    status: Mutex<VecDeque<(Option<Duration>, Result<VmStatus, ApiError>)>>,
    calls: Mutex<Vec<Call>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_create(&self, result: Result<InstanceDetails, ApiError>) -> &Self {
        lock(&self.create).push_back(result);
        self
    }

    pub fn push_stop(&self, result: Result<VmStatus, ApiError>) -> &Self {
        lock(&self.stop).push_back(result);
        self
    }

    pub fn push_status(&self, result: Result<VmStatus, ApiError>) -> &Self {
        lock(&self.status).push_back((None, result));
        self
    }

    /// Queue a status check that answers only after `delay`.
    pub fn push_status_after(
        &self,
        delay: Duration,
        result: Result<VmStatus, ApiError>,
    ) -> &Self {
        lock(&self.status).push_back((Some(delay), result));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    pub fn status_calls(&self) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| matches!(call, Call::Status { .. }))
            .count()
    }

    fn record(&self, call: Call) {
        lock(&self.calls).push(call);
    }
}

impl InstanceBackend for ScriptedBackend {
    async fn create_instance(
        &self,
        credentials: &Credentials,
    ) -> Result<InstanceDetails, ApiError> {
        self.record(Call::Create {
            client_id: credentials.client_id.clone(),
        });
        let next = lock(&self.create).pop_front();
        match next {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }

    async fn stop_instance(
        &self,
        _credentials: &Credentials,
        instance_id: &str,
    ) -> Result<VmStatus, ApiError> {
        self.record(Call::Stop {
            instance_id: instance_id.to_string(),
        });
        let next = lock(&self.stop).pop_front();
        match next {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }

    async fn check_status(
        &self,
        _credentials: &Credentials,
        instance_id: &str,
    ) -> Result<VmStatus, ApiError> {
        self.record(Call::Status {
            instance_id: instance_id.to_string(),
        });
        let next = lock(&self.status).pop_front();
        match next {
            Some((delay, result)) => {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                result
            }
            None => std::future::pending().await,
        }
    }
}

pub fn instance(instance_id: &str, instance_type: &str, region: &str) -> InstanceDetails {
    InstanceDetails {
        instance_id: instance_id.to_string(),
        instance_type: instance_type.to_string(),
        region: region.to_string(),
    }
}

/// A t2.micro status in us-east-1 with the given code, raw token and IP.
pub fn vm_status(code: i64, raw: &str, public_ip: &str) -> VmStatus {
    VmStatus {
        code,
        name: crate::status::status_label(raw).to_string(),
        raw: raw.to_string(),
        public_ip: public_ip.to_string(),
        instance_type: "t2.micro".to_string(),
        region: "us-east-1".to_string(),
    }
}

pub fn transport_error(path: &str) -> ApiError {
    ApiError::Transport {
        url: format!("http://localhost:8000{path}"),
        reason: "connection refused".to_string(),
    }
}

pub fn application_error(path: &str, status: u16, message: &str) -> ApiError {
    ApiError::Application {
        url: format!("http://localhost:8000{path}"),
        status,
        reason: String::new(),
        payload: ErrorPayload::Text(message.to_string()),
    }
}
