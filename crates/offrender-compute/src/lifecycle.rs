//! Render node lifecycle controller.
//!
//! Every mutation is issued once and then blocks until the provider reports
//! the operation terminal. Nothing here retries: a failed create or a failed
//! operation aborts the run and may leave a node behind.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use offrender_models::{
    poll_until, NodeName, NodeState, Poll, PollError, PollPolicy, RemoteNode, RenderJobConfig,
};
use tracing::{info, warn};

use crate::api::{ComputeApi, Placement};
use crate::client::{GceClient, GceConfig};
use crate::error::{ComputeError, ComputeResult};
use crate::types::{
    AccessConfig, AttachedDisk, DiskInitializeParams, Instance, Metadata, MetadataItem,
    NetworkInterface, Operation, ServiceAccount,
};

/// Scopes granted to the node's default service account.
pub const NODE_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/devstorage.full_control",
    "https://www.googleapis.com/auth/compute",
];

/// What to create.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub name: NodeName,
    /// Machine type name, e.g. `e2-highcpu-16`
    pub machine_type: String,
    /// Contents of the `startup-script` metadata item
    pub startup_script: String,
}

/// Instance template settings shared by every node.
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    pub image_project: String,
    pub image_family: String,
    pub disk_type: String,
    pub disk_size_gb: u64,
    pub network: String,
    pub service_account: String,
    /// Polling of long-running operations
    pub operation_poll: PollPolicy,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            image_project: "ubuntu-os-cloud".to_string(),
            image_family: "ubuntu-minimal-2204-lts".to_string(),
            disk_type: "pd-ssd".to_string(),
            disk_size_gb: 10,
            network: "global/networks/default".to_string(),
            service_account: "default".to_string(),
            operation_poll: PollPolicy::every("compute_operation", Duration::from_secs(1)),
        }
    }
}

/// Create, start, stop and delete render nodes.
#[async_trait]
pub trait NodeLifecycle: Send + Sync {
    /// Insert a node and wait until it is running with a known address.
    async fn create(&self, spec: &NodeSpec) -> ComputeResult<RemoteNode>;

    /// Start a stopped node; the address is re-read since it may change.
    async fn start(&self, name: &NodeName) -> ComputeResult<RemoteNode>;

    async fn stop(&self, name: &NodeName) -> ComputeResult<()>;

    async fn delete(&self, name: &NodeName) -> ComputeResult<()>;

    /// Block until `operation` is `DONE`, failing if it finished with errors.
    async fn await_terminal(&self, operation: &Operation) -> ComputeResult<Operation>;
}

/// [`NodeLifecycle`] over any [`ComputeApi`].
pub struct LifecycleController<A> {
    api: A,
    options: LifecycleOptions,
}

impl<A: ComputeApi> LifecycleController<A> {
    pub fn new(api: A, options: LifecycleOptions) -> Self {
        Self { api, options }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    fn placement(&self) -> &Placement {
        self.api.placement()
    }

    fn instance_body(&self, spec: &NodeSpec, source_image: String) -> Instance {
        let placement = self.placement();

        Instance {
            name: spec.name.to_string(),
            description: Some("offrender render node".to_string()),
            machine_type: placement.machine_type_url(&spec.machine_type),
            disks: vec![AttachedDisk {
                boot: true,
                auto_delete: true,
                kind: Some("PERSISTENT".to_string()),
                initialize_params: Some(DiskInitializeParams {
                    disk_size_gb: Some(self.options.disk_size_gb.to_string()),
                    disk_type: Some(placement.disk_type_url(&self.options.disk_type)),
                    source_image: Some(source_image),
                }),
            }],
            network_interfaces: vec![NetworkInterface {
                network: Some(self.options.network.clone()),
                network_ip: None,
                access_configs: vec![AccessConfig {
                    name: Some("External NAT".to_string()),
                    kind: Some("ONE_TO_ONE_NAT".to_string()),
                    nat_ip: None,
                }],
            }],
            service_accounts: vec![ServiceAccount {
                email: self.options.service_account.clone(),
                scopes: NODE_SCOPES.iter().map(|s| s.to_string()).collect(),
            }],
            metadata: Some(Metadata {
                items: vec![MetadataItem {
                    key: "startup-script".to_string(),
                    value: spec.startup_script.clone(),
                }],
            }),
            status: None,
        }
    }

    async fn running_node(&self, name: &NodeName) -> ComputeResult<RemoteNode> {
        let instance = self.api.get_instance(name.as_str()).await?;
        let address = instance
            .external_ip()
            .ok_or_else(|| ComputeError::NoExternalAddress(name.to_string()))?;
        Ok(RemoteNode::running(name.clone(), address))
    }

    fn check_terminal(operation: &Operation) -> ComputeResult<Operation> {
        let messages = operation.error_messages();
        if messages.is_empty() {
            Ok(operation.clone())
        } else {
            Err(ComputeError::OperationFailed {
                operation: operation.name.clone(),
                message: messages.join(", "),
            })
        }
    }
}

#[async_trait]
impl<A: ComputeApi> NodeLifecycle for LifecycleController<A> {
    async fn create(&self, spec: &NodeSpec) -> ComputeResult<RemoteNode> {
        let image = self
            .api
            .image_from_family(&self.options.image_project, &self.options.image_family)
            .await
            .map_err(|e| ComputeError::ImageUnavailable {
                family: format!("{}/{}", self.options.image_project, self.options.image_family),
                reason: e.to_string(),
            })?;

        info!(
            node = %spec.name,
            machine_type = %spec.machine_type,
            zone = %self.placement().zone,
            image = %image.name,
            "Creating render node"
        );

        let operation = self
            .api
            .insert_instance(&self.instance_body(spec, image.self_link))
            .await?;
        self.await_terminal(&operation).await?;

        let node = self.running_node(&spec.name).await?;
        info!(node = %node.name, address = ?node.address, "Render node is up");
        Ok(node)
    }

    async fn start(&self, name: &NodeName) -> ComputeResult<RemoteNode> {
        info!(node = %name, "Starting render node");
        let operation = self.api.start_instance(name.as_str()).await?;
        self.await_terminal(&operation).await?;
        self.running_node(name).await
    }

    async fn stop(&self, name: &NodeName) -> ComputeResult<()> {
        info!(node = %name, "Stopping render node");
        let operation = self.api.stop_instance(name.as_str()).await?;
        self.await_terminal(&operation).await?;
        info!(node = %name, state = %NodeState::Stopped, "Render node stopped");
        Ok(())
    }

    async fn delete(&self, name: &NodeName) -> ComputeResult<()> {
        info!(node = %name, "Deleting render node");
        let operation = self.api.delete_instance(name.as_str()).await?;
        self.await_terminal(&operation).await?;
        info!(node = %name, state = %NodeState::Deleted, "Render node deleted");
        Ok(())
    }

    async fn await_terminal(&self, operation: &Operation) -> ComputeResult<Operation> {
        if operation.is_done() {
            return Self::check_terminal(operation);
        }

        let name = operation.name.as_str();
        let done = poll_until(
            &self.options.operation_poll,
            || async move {
                let current = self.api.get_operation(name).await?;
                Ok::<_, ComputeError>(if current.is_done() {
                    Poll::Ready(current)
                } else {
                    Poll::Pending
                })
            },
            |_| {},
        )
        .await
        .map_err(|e| match e {
            PollError::Aborted(err) => {
                warn!(operation = %name, error = %err, "Polling operation failed");
                err
            }
            PollError::Exhausted { attempts, elapsed } => ComputeError::WaitExhausted {
                operation: name.to_string(),
                reason: format!("gave up after {attempts} attempts ({elapsed:?})"),
            },
        })?;

        Self::check_terminal(&done)
    }
}

/// Builds a lifecycle once the job config has been validated.
pub trait LifecycleFactory: Send + Sync {
    type Lifecycle: NodeLifecycle;

    fn build(
        &self,
        config: &RenderJobConfig,
        credentials: &Path,
    ) -> ComputeResult<Self::Lifecycle>;
}

/// Factory for the REST-backed controller.
#[derive(Debug, Clone, Default)]
pub struct GceLifecycleFactory {
    pub options: LifecycleOptions,
}

impl LifecycleFactory for GceLifecycleFactory {
    type Lifecycle = LifecycleController<GceClient>;

    fn build(
        &self,
        config: &RenderJobConfig,
        credentials: &Path,
    ) -> ComputeResult<Self::Lifecycle> {
        let placement = Placement::new(&config.project, &config.zone);
        let client = GceClient::from_credentials_file(GceConfig::from_env(placement), credentials)?;
        Ok(LifecycleController::new(client, self.options.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use crate::types::{Image, OperationErrorItem, OperationErrors, OperationStatus};

    /// In-memory provider: every mutation stays pending for `pending_polls`
    /// polls, then finishes with `final_errors`.
    struct FakeCompute {
        placement: Placement,
        pending_polls: u32,
        final_errors: Vec<&'static str>,
        fail_polls: bool,
        image_missing: bool,
        address: Option<&'static str>,
        polls: AtomicU32,
        calls: Mutex<Vec<String>>,
        inserted: Mutex<Option<Instance>>,
    }

    impl FakeCompute {
        fn new() -> Self {
            Self {
                placement: Placement::new("proj", "us-east1-b"),
                pending_polls: 0,
                final_errors: Vec::new(),
                fail_polls: false,
                image_missing: false,
                address: Some("34.1.2.3"),
                polls: AtomicU32::new(0),
                calls: Mutex::new(Vec::new()),
                inserted: Mutex::new(None),
            }
        }

        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn pending(name: &str) -> Operation {
            Operation {
                name: name.to_string(),
                status: OperationStatus::Pending,
                operation_type: None,
                target_link: None,
                error: None,
            }
        }
    }

    #[async_trait]
    impl ComputeApi for FakeCompute {
        fn placement(&self) -> &Placement {
            &self.placement
        }

        async fn image_from_family(&self, project: &str, family: &str) -> ComputeResult<Image> {
            self.record("image");
            if self.image_missing {
                return Err(ComputeError::not_found(format!("{project}/{family}")));
            }
            Ok(Image {
                name: "ubuntu-minimal-2204-jammy-v20240301".into(),
                self_link: format!("projects/{project}/global/images/ubuntu-minimal-2204-jammy"),
                family: Some(family.to_string()),
            })
        }

        async fn insert_instance(&self, instance: &Instance) -> ComputeResult<Operation> {
            self.record(format!("insert:{}", instance.name));
            *self.inserted.lock().unwrap() = Some(instance.clone());
            Ok(Self::pending("op-insert"))
        }

        async fn start_instance(&self, name: &str) -> ComputeResult<Operation> {
            self.record(format!("start:{name}"));
            Ok(Self::pending("op-start"))
        }

        async fn stop_instance(&self, name: &str) -> ComputeResult<Operation> {
            self.record(format!("stop:{name}"));
            Ok(Self::pending("op-stop"))
        }

        async fn delete_instance(&self, name: &str) -> ComputeResult<Operation> {
            self.record(format!("delete:{name}"));
            Ok(Self::pending("op-delete"))
        }

        async fn get_instance(&self, name: &str) -> ComputeResult<Instance> {
            self.record(format!("get:{name}"));
            Ok(Instance {
                name: name.to_string(),
                network_interfaces: vec![NetworkInterface {
                    network: None,
                    network_ip: Some("10.0.0.2".into()),
                    access_configs: vec![AccessConfig {
                        name: None,
                        kind: None,
                        nat_ip: self.address.map(str::to_string),
                    }],
                }],
                ..Default::default()
            })
        }

        async fn get_operation(&self, operation: &str) -> ComputeResult<Operation> {
            self.record(format!("poll:{operation}"));
            if self.fail_polls {
                return Err(ComputeError::request_failed("connection reset"));
            }

            let seen = self.polls.fetch_add(1, Ordering::SeqCst);
            let mut op = Self::pending(operation);
            if seen >= self.pending_polls {
                op.status = OperationStatus::Done;
                if !self.final_errors.is_empty() {
                    op.error = Some(OperationErrors {
                        errors: self
                            .final_errors
                            .iter()
                            .map(|m| OperationErrorItem {
                                message: Some(m.to_string()),
                                ..Default::default()
                            })
                            .collect(),
                    });
                }
            } else if seen > 0 {
                op.status = OperationStatus::Running;
            }
            Ok(op)
        }
    }

    fn spec() -> NodeSpec {
        NodeSpec {
            name: NodeName::parse("offrender-ab12").unwrap(),
            machine_type: "e2-highcpu-16".into(),
            startup_script: "#!/bin/bash\necho hi\n".into(),
        }
    }

    fn controller(api: FakeCompute) -> LifecycleController<FakeCompute> {
        LifecycleController::new(api, LifecycleOptions::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_waits_for_operation_and_reads_address() {
        let mut api = FakeCompute::new();
        api.pending_polls = 3;
        let controller = controller(api);

        let start = tokio::time::Instant::now();
        let node = controller.create(&spec()).await.unwrap();

        assert_eq!(node.state, NodeState::Running);
        assert_eq!(node.address.as_deref(), Some("34.1.2.3"));
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        assert_eq!(
            controller.api().calls(),
            vec![
                "image",
                "insert:offrender-ab12",
                "poll:op-insert",
                "poll:op-insert",
                "poll:op-insert",
                "poll:op-insert",
                "get:offrender-ab12",
            ]
        );
    }

    #[tokio::test]
    async fn test_create_instance_body() {
        let controller = controller(FakeCompute::new());
        controller.create(&spec()).await.unwrap();

        let body = controller.api().inserted.lock().unwrap().clone().unwrap();
        assert_eq!(body.machine_type, "zones/us-east1-b/machineTypes/e2-highcpu-16");

        let disk = &body.disks[0];
        assert!(disk.boot && disk.auto_delete);
        let params = disk.initialize_params.as_ref().unwrap();
        assert_eq!(params.disk_size_gb.as_deref(), Some("10"));
        assert!(params.disk_type.as_deref().unwrap().ends_with("/diskTypes/pd-ssd"));
        assert!(params
            .source_image
            .as_deref()
            .unwrap()
            .starts_with("projects/ubuntu-os-cloud/"));

        let nic = &body.network_interfaces[0];
        assert_eq!(nic.network.as_deref(), Some("global/networks/default"));
        assert_eq!(nic.access_configs[0].kind.as_deref(), Some("ONE_TO_ONE_NAT"));

        assert_eq!(body.service_accounts[0].email, "default");
        assert_eq!(body.service_accounts[0].scopes.len(), 2);
        assert_eq!(
            body.metadata_value("startup-script"),
            Some("#!/bin/bash\necho hi\n")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_terminal_never_succeeds_early() {
        let mut api = FakeCompute::new();
        api.pending_polls = 7;
        let controller = controller(api);

        let op = controller
            .await_terminal(&FakeCompute::pending("op-x"))
            .await
            .unwrap();

        assert!(op.is_done());
        assert_eq!(controller.api().polls.load(Ordering::SeqCst), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_terminal_aggregates_errors() {
        let mut api = FakeCompute::new();
        api.pending_polls = 2;
        api.final_errors = vec!["Quota 'CPUS' exceeded", "Zone resources exhausted"];
        let controller = controller(api);

        let err = controller
            .await_terminal(&FakeCompute::pending("op-x"))
            .await
            .unwrap_err();

        match err {
            ComputeError::OperationFailed { operation, message } => {
                assert_eq!(operation, "op-x");
                assert_eq!(message, "Quota 'CPUS' exceeded, Zone resources exhausted");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_terminal_transport_error_is_immediate() {
        let mut api = FakeCompute::new();
        api.fail_polls = true;
        let controller = controller(api);

        let result = controller.await_terminal(&FakeCompute::pending("op-x")).await;

        assert!(matches!(result, Err(ComputeError::RequestFailed(_))));
        assert_eq!(controller.api().calls(), vec!["poll:op-x"]);
    }

    #[tokio::test]
    async fn test_await_terminal_done_handle_skips_polling() {
        let controller = controller(FakeCompute::new());
        let mut op = FakeCompute::pending("op-x");
        op.status = OperationStatus::Done;

        controller.await_terminal(&op).await.unwrap();
        assert!(controller.api().calls().is_empty());
    }

    #[tokio::test]
    async fn test_create_fails_without_image() {
        let mut api = FakeCompute::new();
        api.image_missing = true;
        let controller = controller(api);

        let result = controller.create(&spec()).await;
        assert!(matches!(result, Err(ComputeError::ImageUnavailable { .. })));
        assert_eq!(controller.api().calls(), vec!["image"]);
    }

    #[tokio::test]
    async fn test_create_fails_without_external_address() {
        let mut api = FakeCompute::new();
        api.address = None;
        let controller = controller(api);

        let result = controller.create(&spec()).await;
        assert!(matches!(result, Err(ComputeError::NoExternalAddress(_))));
    }

    #[tokio::test]
    async fn test_start_stop_delete() {
        let controller = controller(FakeCompute::new());
        let name = spec().name;

        let node = controller.start(&name).await.unwrap();
        assert_eq!(node.address.as_deref(), Some("34.1.2.3"));
        controller.stop(&name).await.unwrap();
        controller.delete(&name).await.unwrap();

        assert_eq!(
            controller.api().calls(),
            vec![
                "start:offrender-ab12",
                "poll:op-start",
                "get:offrender-ab12",
                "stop:offrender-ab12",
                "poll:op-stop",
                "delete:offrender-ab12",
                "poll:op-delete",
            ]
        );
    }
}
