//! Adapter handles
//!
//! A handle is what the registry hands out: the descriptor, the live adapter
//! and the circuit breaker guarding it. Every business call and every health
//! probe goes through the handle's breaker.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use core_kernel::{
    dispatch, AdapterError, AdapterId, EntityType, NormalizedEntity, OperationMetadata,
    ProviderAdapter,
};
use domain_resilience::{BreakerError, CircuitBreaker, ProbeTarget};

use crate::descriptor::AdapterDescriptor;

/// Lifecycle status of a registered adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterStatus {
    /// Instantiated, not started
    Registered,
    Starting,
    Running,
    /// `start()` returned an error
    Failed,
    /// Not started because a dependency is not running
    Blocked,
    Stopped,
}

pub struct AdapterHandle {
    descriptor: AdapterDescriptor,
    adapter: Arc<dyn ProviderAdapter>,
    breaker: CircuitBreaker,
    status: Mutex<AdapterStatus>,
}

impl AdapterHandle {
    pub fn new(
        descriptor: AdapterDescriptor,
        adapter: Arc<dyn ProviderAdapter>,
        breaker: CircuitBreaker,
    ) -> Self {
        Self {
            descriptor,
            adapter,
            breaker,
            status: Mutex::new(AdapterStatus::Registered),
        }
    }

    pub fn id(&self) -> &AdapterId {
        &self.descriptor.id
    }

    pub fn descriptor(&self) -> &AdapterDescriptor {
        &self.descriptor
    }

    pub fn adapter(&self) -> &Arc<dyn ProviderAdapter> {
        &self.adapter
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn priority(&self) -> u32 {
        self.descriptor.priority()
    }

    pub fn status(&self) -> AdapterStatus {
        *self.status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn set_status(&self, status: AdapterStatus) {
        *self.status.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = status;
    }

    /// Writes `payload` through the capability matching `entity_type`
    ///
    /// The call is guarded by the breaker and bounded by `timeout`, or by the
    /// descriptor's timeout when none is given.
    pub async fn invoke(
        &self,
        entity_type: EntityType,
        payload: &NormalizedEntity,
        metadata: &OperationMetadata,
        timeout: Option<Duration>,
    ) -> Result<NormalizedEntity, BreakerError> {
        let timeout = timeout.unwrap_or_else(|| self.descriptor.options.timeout());
        self.breaker
            .call_with_timeout(timeout, || {
                dispatch(self.adapter.as_ref(), entity_type, payload, metadata)
            })
            .await
    }

    pub(crate) async fn start(&self) -> Result<(), AdapterError> {
        self.set_status(AdapterStatus::Starting);
        match self.adapter.start().await {
            Ok(()) => {
                self.set_status(AdapterStatus::Running);
                info!(adapter_id = %self.id(), provider_type = %self.descriptor.provider_type, "Adapter started");
                Ok(())
            }
            Err(error) => {
                self.set_status(AdapterStatus::Failed);
                warn!(adapter_id = %self.id(), error = %error, "Adapter failed to start");
                Err(error)
            }
        }
    }

    pub(crate) async fn stop(&self) -> Result<(), AdapterError> {
        let result = self.adapter.stop().await;
        self.set_status(AdapterStatus::Stopped);
        match &result {
            Ok(()) => info!(adapter_id = %self.id(), "Adapter stopped"),
            Err(error) => warn!(adapter_id = %self.id(), error = %error, "Adapter did not stop cleanly"),
        }
        result
    }
}

impl fmt::Debug for AdapterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterHandle")
            .field("id", self.id())
            .field("provider_type", &self.descriptor.provider_type)
            .field("status", &self.status())
            .field("circuit_state", &self.breaker.state())
            .finish()
    }
}

#[async_trait]
impl ProbeTarget for AdapterHandle {
    fn adapter_id(&self) -> &AdapterId {
        self.id()
    }

    fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    async fn probe(&self) -> Result<(), AdapterError> {
        self.adapter.probe().await
    }
}
