//! Mock CommandClient for unit testing
//!
//! Holds scripted outcomes in memory and records every enrollment it
//! receives, so tests can assert on what would have reached the CA.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::command_trait::CommandClientTrait;
use crate::error::CommandError;
use crate::models::{EnrollmentRequest, IssuedCertificate};

/// Failure a mock call should produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFailure {
    /// API answered with this HTTP status
    Status(u16),
    /// Credentials rejected
    Unauthorized,
    /// Enrollment answered with a non-issued disposition
    Disposition(String),
    /// Enrollment answered with a body that does not decode
    Unreadable,
}

impl MockFailure {
    fn into_error(self) -> CommandError {
        match self {
            MockFailure::Status(status) => CommandError::Api {
                status,
                message: format!("mock status {status}"),
            },
            MockFailure::Unauthorized => CommandError::Authentication("mock 401".to_string()),
            MockFailure::Disposition(disposition) => CommandError::Disposition {
                disposition,
                message: "mock disposition".to_string(),
            },
            MockFailure::Unreadable => CommandError::UnreadableEnrollment("mock garbled body".to_string()),
        }
    }
}

/// Mock CommandClient for testing
#[derive(Debug, Clone)]
pub struct MockCommandClient {
    base_url: String,
    health_failure: Arc<Mutex<Option<MockFailure>>>,
    enroll_failures: Arc<Mutex<VecDeque<MockFailure>>>,
    chain: Arc<Mutex<Vec<String>>>,
    enrollments: Arc<Mutex<Vec<EnrollmentRequest>>>,
    health_checks: Arc<Mutex<usize>>,
}

impl MockCommandClient {
    /// Healthy mock that issues a fixed two-certificate chain.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            health_failure: Arc::new(Mutex::new(None)),
            enroll_failures: Arc::new(Mutex::new(VecDeque::new())),
            chain: Arc::new(Mutex::new(vec![
                "-----BEGIN CERTIFICATE-----\nTEVBRg==\n-----END CERTIFICATE-----\n".to_string(),
                "-----BEGIN CERTIFICATE-----\nUk9PVA==\n-----END CERTIFICATE-----\n".to_string(),
            ])),
            enrollments: Arc::new(Mutex::new(Vec::new())),
            health_checks: Arc::new(Mutex::new(0)),
        }
    }

    /// Makes every health check fail (or succeed again with `None`).
    pub fn set_health_failure(&self, failure: Option<MockFailure>) {
        *self.health_failure.lock().unwrap() = failure;
    }

    /// Queues a failure for the next enrollment.
    pub fn push_enroll_failure(&self, failure: MockFailure) {
        self.enroll_failures.lock().unwrap().push_back(failure);
    }

    /// Replaces the chain returned by successful enrollments.
    pub fn set_chain(&self, chain: Vec<String>) {
        *self.chain.lock().unwrap() = chain;
    }

    /// Enrollments received so far, including failed ones.
    pub fn enrollments(&self) -> Vec<EnrollmentRequest> {
        self.enrollments.lock().unwrap().clone()
    }

    /// Number of health checks performed.
    pub fn health_checks(&self) -> usize {
        *self.health_checks.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl CommandClientTrait for MockCommandClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn check_connection(&self) -> Result<(), CommandError> {
        *self.health_checks.lock().unwrap() += 1;
        match self.health_failure.lock().unwrap().clone() {
            Some(failure) => Err(failure.into_error()),
            None => Ok(()),
        }
    }

    async fn enroll_csr(&self, request: EnrollmentRequest) -> Result<IssuedCertificate, CommandError> {
        self.enrollments.lock().unwrap().push(request);
        if let Some(failure) = self.enroll_failures.lock().unwrap().pop_front() {
            return Err(failure.into_error());
        }
        Ok(IssuedCertificate {
            certificates: self.chain.lock().unwrap().clone(),
            serial_number: Some("01".to_string()),
            thumbprint: None,
            certificate_id: Some(1),
            request_id: Some(1),
        })
    }
}
