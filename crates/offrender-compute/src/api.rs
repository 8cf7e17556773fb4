//! Provider API seam.
//!
//! [`ComputeApi`] is the narrow set of Compute Engine calls the lifecycle
//! controller needs. The REST client implements it; tests substitute an
//! in-memory fake.

use async_trait::async_trait;

use crate::error::ComputeResult;
use crate::types::{Image, Instance, Operation};

/// Project and zone every call is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub project: String,
    pub zone: String,
}

impl Placement {
    pub fn new(project: impl Into<String>, zone: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            zone: zone.into(),
        }
    }

    /// Partial URL of a machine type in this zone.
    pub fn machine_type_url(&self, machine_type: &str) -> String {
        format!("zones/{}/machineTypes/{}", self.zone, machine_type)
    }

    /// Partial URL of a disk type in this zone.
    pub fn disk_type_url(&self, disk_type: &str) -> String {
        format!(
            "projects/{}/zones/{}/diskTypes/{}",
            self.project, self.zone, disk_type
        )
    }
}

#[async_trait]
pub trait ComputeApi: Send + Sync {
    fn placement(&self) -> &Placement;

    /// Resolve the latest image of a public image family.
    async fn image_from_family(&self, project: &str, family: &str) -> ComputeResult<Image>;

    async fn insert_instance(&self, instance: &Instance) -> ComputeResult<Operation>;

    async fn start_instance(&self, name: &str) -> ComputeResult<Operation>;

    async fn stop_instance(&self, name: &str) -> ComputeResult<Operation>;

    async fn delete_instance(&self, name: &str) -> ComputeResult<Operation>;

    async fn get_instance(&self, name: &str) -> ComputeResult<Instance>;

    /// Read the current state of a zonal operation.
    async fn get_operation(&self, operation: &str) -> ComputeResult<Operation>;
}
