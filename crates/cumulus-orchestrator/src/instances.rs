//! Instance lifecycle: placement, networking, remote creation and
//! bookkeeping of a single workload.

use std::fmt;
use std::str::FromStr;

use cumulus_agents::AgentRegistry;
use cumulus_agents::methods::{
    self, AutoStartArgs, CreateInstanceArgs, InstanceRef, InstanceStateReply, InterfaceSpec, IsRunningReply,
    RemoteConnectionReply,
};
use cumulus_cascade::Cascade;
use cumulus_net::{AdapterRequest, AddressAllocator};
use cumulus_placement::HostElector;
use cumulus_state::{Cost, DocumentMeta, Host, Instance, PowerState, Project, StateStore, Subnet, Zone};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{OrchestratorError, OrchestratorResult};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateInstance {
    pub name: String,
    pub zone_id: String,
    /// Skip election and place on this host.
    #[serde(default)]
    pub host_id: Option<String>,
    pub vcpus: u32,
    pub memory_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerAction {
    Start,
    Stop,
    Shutdown,
    Reboot,
    Reset,
    Suspend,
    Resume,
}

impl PowerAction {
    pub fn method(&self) -> &'static str {
        match self {
            PowerAction::Start => methods::START_INSTANCE,
            PowerAction::Stop => methods::STOP_INSTANCE,
            PowerAction::Shutdown => methods::SHUTDOWN_INSTANCE,
            PowerAction::Reboot => methods::REBOOT_INSTANCE,
            PowerAction::Reset => methods::RESET_INSTANCE,
            PowerAction::Suspend => methods::SUSPEND_INSTANCE,
            PowerAction::Resume => methods::RESUME_INSTANCE,
        }
    }

    /// Power state recorded once the agent accepted the action.
    pub fn resulting_state(&self) -> PowerState {
        match self {
            PowerAction::Start | PowerAction::Reboot | PowerAction::Reset | PowerAction::Resume => {
                PowerState::Running
            }
            PowerAction::Stop | PowerAction::Shutdown => PowerState::Stopped,
            PowerAction::Suspend => PowerState::Suspended,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PowerAction::Start => "start",
            PowerAction::Stop => "stop",
            PowerAction::Shutdown => "shutdown",
            PowerAction::Reboot => "reboot",
            PowerAction::Reset => "reset",
            PowerAction::Suspend => "suspend",
            PowerAction::Resume => "resume",
        }
    }
}

impl fmt::Display for PowerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PowerAction {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(PowerAction::Start),
            "stop" => Ok(PowerAction::Stop),
            "shutdown" => Ok(PowerAction::Shutdown),
            "reboot" => Ok(PowerAction::Reboot),
            "reset" => Ok(PowerAction::Reset),
            "suspend" => Ok(PowerAction::Suspend),
            "resume" => Ok(PowerAction::Resume),
            other => Err(OrchestratorError::BadRequest(format!("unknown power action: {other}"))),
        }
    }
}

#[derive(Clone)]
pub struct InstanceService {
    state: StateStore,
    registry: AgentRegistry,
    elector: HostElector,
    allocator: AddressAllocator,
    cascade: Cascade,
}

impl InstanceService {
    pub fn new(
        state: StateStore,
        registry: AgentRegistry,
        elector: HostElector,
        allocator: AddressAllocator,
        cascade: Cascade,
    ) -> Self {
        Self {
            state,
            registry,
            elector,
            allocator,
            cascade,
        }
    }

    /// Place, wire up and start a new instance for a project.
    ///
    /// Every step that fails undoes the ones before it: the adapter is
    /// deleted and, once the agent created the instance, a remote delete is
    /// attempted.
    pub async fn create(&self, project_id: &str, req: CreateInstance) -> OrchestratorResult<Instance> {
        if req.vcpus == 0 {
            return Err(OrchestratorError::BadRequest("an instance needs at least one vCPU".into()));
        }
        let project: Project = self.state.fetch(project_id)?;
        if let Some(resource) = project.quotas.exceeded_by(&project.usage, req.vcpus, req.memory_bytes) {
            return Err(OrchestratorError::QuotaExceeded {
                project: project.name,
                resource,
            });
        }

        let zone: Zone = self.state.fetch(&req.zone_id)?;
        let host = self.pick_host(&req, &zone).await?;
        let subnet_id = project.private_subnets.get(&zone.region_id).cloned().ok_or_else(|| {
            OrchestratorError::InvalidConfig(format!(
                "project {} has no private subnet in the region of zone {}",
                project.name, zone.name
            ))
        })?;
        let subnet: Subnet = self.state.fetch(&subnet_id)?;

        let instance_id = uuid::Uuid::new_v4().to_string();
        let adapter = self.allocator.create_adapter(
            &subnet_id,
            AdapterRequest {
                name: format!("{}-eth0", req.name),
                instance_id: Some(instance_id.clone()),
                ..Default::default()
            },
        )?;

        let args = CreateInstanceArgs {
            id: instance_id.clone(),
            name: req.name.clone(),
            vcpus: req.vcpus,
            memory_bytes: req.memory_bytes,
            interfaces: vec![InterfaceSpec {
                mac: adapter.mac.clone(),
                addresses: adapter.addresses.clone(),
                bridge: subnet.interface.clone(),
            }],
        };
        if let Err(e) = self
            .registry
            .dispatch_as::<Value>(&host.agents, methods::CREATE_INSTANCE, &args)
            .await
        {
            self.discard_adapter(&adapter.meta.id);
            return Err(e.into());
        }

        let mut instance = Instance {
            meta: DocumentMeta::with_id(&instance_id),
            name: req.name,
            project_id: project.meta.id.clone(),
            zone_id: zone.meta.id.clone(),
            host_id: host.meta.id.clone(),
            vcpus: req.vcpus,
            memory_bytes: req.memory_bytes,
            adapters: vec![adapter.meta.id.clone()],
            power: PowerState::Running,
            cost: Cost::default(),
        };
        if let Err(e) = self.persist_new(&mut instance) {
            self.remote_delete_best_effort(&host.agents, &instance_id).await;
            self.undo_persist(&instance);
            self.discard_adapter(&adapter.meta.id);
            return Err(e);
        }

        self.cascade.trigger_host(&host.meta.id);
        info!(
            instance_id = %instance.meta.id,
            name = %instance.name,
            project = %project.name,
            host = %host.name,
            address = ?adapter.addresses,
            "instance created"
        );
        Ok(instance)
    }

    async fn pick_host(&self, req: &CreateInstance, zone: &Zone) -> OrchestratorResult<Host> {
        match &req.host_id {
            Some(host_id) => {
                let host: Host = self.state.fetch(host_id)?;
                if host.zone_id != zone.meta.id {
                    return Err(OrchestratorError::BadRequest(format!(
                        "host {} is not in zone {}",
                        host.name, zone.name
                    )));
                }
                Ok(host)
            }
            None => {
                let pick = self.elector.elect_in_zone(&req.name, &zone.meta.id, &[]).await?;
                Ok(self.state.fetch(&pick.host_id)?)
            }
        }
    }

    fn persist_new(&self, instance: &mut Instance) -> OrchestratorResult<()> {
        self.state.insert(instance)?;
        let attached = instance.clone();
        self.state
            .modify(&instance.host_id, |h: &mut Host| h.attach_instance(&attached))?;
        self.state.modify(&instance.project_id, |p: &mut Project| {
            p.usage.instances += 1;
            p.usage.vcpus += attached.vcpus;
            p.usage.memory_bytes += attached.memory_bytes;
            p.instances.push(attached.meta.id.clone());
        })?;
        Ok(())
    }

    /// Best-effort reversal of [`InstanceService::persist_new`].
    fn undo_persist(&self, instance: &Instance) {
        if let Err(e) = self.detach_from_host(instance) {
            warn!(instance_id = %instance.meta.id, error = %e, "rollback: host detach failed");
        }
        if let Err(e) = self.unlink_from_project(instance) {
            warn!(instance_id = %instance.meta.id, error = %e, "rollback: project unlink failed");
        }
        if let Err(e) = self.state.delete::<Instance>(&instance.meta.id) {
            warn!(instance_id = %instance.meta.id, error = %e, "rollback: instance delete failed");
        }
    }

    fn discard_adapter(&self, adapter_id: &str) {
        if let Err(e) = self.allocator.delete_adapter(adapter_id) {
            warn!(%adapter_id, error = %e, "rollback: adapter delete failed");
        }
    }

    async fn remote_delete_best_effort(&self, agents: &[String], instance_id: &str) {
        let reference = InstanceRef {
            id: instance_id.to_string(),
        };
        if let Err(e) = self
            .registry
            .dispatch_as::<Value>(agents, methods::DELETE_INSTANCE, &reference)
            .await
        {
            warn!(%instance_id, error = %e, "rollback: remote delete failed");
        }
    }

    fn detach_from_host(&self, instance: &Instance) -> OrchestratorResult<()> {
        match self.state.get::<Host>(&instance.host_id)? {
            Some(mut host) => {
                if host.detach_instance(instance) {
                    self.state.update(&mut host)?;
                }
            }
            None => warn!(instance_id = %instance.meta.id, host_id = %instance.host_id, "instance references missing host"),
        }
        Ok(())
    }

    fn unlink_from_project(&self, instance: &Instance) -> OrchestratorResult<()> {
        let Some(mut project) = self.state.get::<Project>(&instance.project_id)? else {
            warn!(instance_id = %instance.meta.id, project_id = %instance.project_id, "instance references missing project");
            return Ok(());
        };
        let before = project.instances.len();
        project.instances.retain(|id| id != &instance.meta.id);
        if project.instances.len() != before {
            project.usage.instances = project.usage.instances.saturating_sub(1);
            project.usage.vcpus = project.usage.vcpus.saturating_sub(instance.vcpus);
            project.usage.memory_bytes = project.usage.memory_bytes.saturating_sub(instance.memory_bytes);
            self.state.update(&mut project)?;
        }
        Ok(())
    }

    /// Delete an instance on its host, then its adapters and every link to it.
    pub async fn delete(&self, id: &str) -> OrchestratorResult<()> {
        let instance: Instance = self.state.fetch(id)?;

        let host = self.state.get::<Host>(&instance.host_id)?;
        match &host {
            Some(host) => {
                let reference = InstanceRef { id: id.to_string() };
                self.registry
                    .dispatch_as::<Value>(&host.agents, methods::DELETE_INSTANCE, &reference)
                    .await?;
            }
            None => warn!(instance_id = %id, host_id = %instance.host_id, "host is gone, skipping remote delete"),
        }

        for adapter_id in &instance.adapters {
            if !self.allocator.delete_adapter(adapter_id)? {
                debug!(instance_id = %id, %adapter_id, "adapter already gone");
            }
        }
        self.detach_from_host(&instance)?;
        self.unlink_from_project(&instance)?;
        self.state.delete::<Instance>(id)?;

        if host.is_some() {
            self.cascade.trigger_host(&instance.host_id);
        }
        info!(instance_id = %id, name = %instance.name, "instance deleted");
        Ok(())
    }

    /// Rollback variant of [`InstanceService::delete`]: the remote delete
    /// is attempted but its failure is only logged, and every local trace
    /// of the instance is removed regardless.
    pub async fn discard(&self, id: &str) -> OrchestratorResult<()> {
        let instance: Instance = self.state.fetch(id)?;
        let host = self.state.get::<Host>(&instance.host_id)?;
        if let Some(host) = &host {
            self.remote_delete_best_effort(&host.agents, id).await;
        }

        for adapter_id in &instance.adapters {
            self.discard_adapter(adapter_id);
        }
        self.undo_persist(&instance);

        if host.is_some() {
            self.cascade.trigger_host(&instance.host_id);
        }
        info!(instance_id = %id, name = %instance.name, "instance discarded");
        Ok(())
    }

    pub fn get(&self, id: &str) -> OrchestratorResult<Instance> {
        Ok(self.state.fetch(id)?)
    }

    pub fn list(&self, project_id: Option<&str>) -> OrchestratorResult<Vec<Instance>> {
        Ok(self
            .state
            .find(|i: &Instance| project_id.is_none_or(|p| i.project_id == p))?)
    }

    /// The instance and the host running it.
    fn locate(&self, id: &str) -> OrchestratorResult<(Instance, Host)> {
        let instance: Instance = self.state.fetch(id)?;
        let host = self.state.get::<Host>(&instance.host_id)?.ok_or_else(|| {
            OrchestratorError::NotFound(format!("host {} of instance {}", instance.host_id, instance.name))
        })?;
        Ok((instance, host))
    }

    pub async fn power(&self, id: &str, action: PowerAction) -> OrchestratorResult<Instance> {
        let (instance, host) = self.locate(id)?;
        let reference = InstanceRef { id: id.to_string() };
        self.registry
            .dispatch_as::<Value>(&host.agents, action.method(), &reference)
            .await?;

        let power = action.resulting_state();
        self.state.modify(id, |i: &mut Instance| i.power = power)?;
        info!(instance_id = %id, name = %instance.name, %action, "power action applied");
        Ok(self.state.fetch(id)?)
    }

    pub async fn set_auto_start(&self, id: &str, enabled: bool) -> OrchestratorResult<()> {
        let (_, host) = self.locate(id)?;
        let args = AutoStartArgs {
            id: id.to_string(),
            enabled,
        };
        self.registry
            .dispatch_as::<Value>(&host.agents, methods::SET_INSTANCE_AUTO_START, &args)
            .await?;
        debug!(instance_id = %id, enabled, "auto start changed");
        Ok(())
    }

    /// Hypervisor-reported state, e.g. `running` or `shut off`.
    pub async fn state(&self, id: &str) -> OrchestratorResult<String> {
        let (_, host) = self.locate(id)?;
        let reply: InstanceStateReply = self
            .registry
            .dispatch_as(&host.agents, methods::GET_INSTANCE_STATE, InstanceRef { id: id.to_string() })
            .await?;
        Ok(reply.state)
    }

    pub async fn remote_console_url(&self, id: &str) -> OrchestratorResult<String> {
        let (_, host) = self.locate(id)?;
        let reply: RemoteConnectionReply = self
            .registry
            .dispatch_as(
                &host.agents,
                methods::GET_INSTANCE_REMOTE_CONNECTION_URL,
                InstanceRef { id: id.to_string() },
            )
            .await?;
        Ok(reply.url)
    }

    pub async fn is_running(&self, id: &str) -> OrchestratorResult<bool> {
        let (_, host) = self.locate(id)?;
        let reply: IsRunningReply = self
            .registry
            .dispatch_as(&host.agents, methods::IS_INSTANCE_RUNNING, InstanceRef { id: id.to_string() })
            .await?;
        Ok(reply.running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::fixture::Fixture;
    use cumulus_state::{Adapter, HostUsage, ProjectQuotas};
    use serde_json::json;

    const GIB: u64 = 1024 * 1024 * 1024;

    fn req(fx: &Fixture, name: &str) -> CreateInstance {
        CreateInstance {
            name: name.into(),
            zone_id: fx.zones[0].clone(),
            host_id: None,
            vcpus: 2,
            memory_bytes: 4 * GIB,
        }
    }

    #[tokio::test]
    async fn create_wires_everything_together() {
        let fx = Fixture::new(&["a"], 1).await;
        let svc = &fx.plane.instances;

        let instance = svc.create(&fx.project_id, req(&fx, "web-1")).await.unwrap();
        assert_eq!(instance.host_id, fx.hosts[0].id);
        assert_eq!(instance.power, PowerState::Running);

        let adapter: Adapter = fx.plane.state.fetch(&instance.adapters[0]).unwrap();
        assert_eq!(adapter.instance_id.as_deref(), Some(instance.meta.id.as_str()));
        assert!(!adapter.reserved);

        let host: Host = fx.plane.state.fetch(&fx.hosts[0].id).unwrap();
        assert_eq!(host.usage.instances, 1);
        assert_eq!(host.usage.vcpus, 2);

        let project: Project = fx.plane.state.fetch(&fx.project_id).unwrap();
        assert_eq!(project.instances, vec![instance.meta.id.clone()]);
        assert_eq!(project.usage.memory_bytes, 4 * GIB);

        let calls = fx.hosts[0].conn.calls();
        let (method, params) = calls
            .iter()
            .find(|(m, _)| m == methods::CREATE_INSTANCE)
            .unwrap();
        assert_eq!(method, methods::CREATE_INSTANCE);
        assert_eq!(params["id"], json!(instance.meta.id));
        assert_eq!(params["interfaces"][0]["bridge"], json!("br-private"));
        assert_eq!(params["interfaces"][0]["mac"], json!(adapter.mac));
    }

    #[tokio::test]
    async fn quota_is_checked_before_anything_happens() {
        let fx = Fixture::new(&["a"], 1).await;
        fx.plane
            .projects
            .set_quotas(
                &fx.project_id,
                ProjectQuotas {
                    vcpus: 1,
                    ..Default::default()
                },
            )
            .unwrap();

        let err = fx.plane.instances.create(&fx.project_id, req(&fx, "web")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::QuotaExceeded);
        assert_eq!(fx.hosts[0].conn.calls_to(methods::CREATE_INSTANCE), 0);
        assert!(fx.plane.state.list::<Adapter>().unwrap().is_empty());
    }

    #[tokio::test]
    async fn remote_failure_releases_the_adapter() {
        let fx = Fixture::new(&["a"], 1).await;
        fx.hosts[0].conn.fail(methods::CREATE_INSTANCE, "out of disk");

        let err = fx.plane.instances.create(&fx.project_id, req(&fx, "web")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Dispatch);
        assert!(err.to_string().contains("out of disk"));

        assert!(fx.plane.state.list::<Adapter>().unwrap().is_empty());
        assert!(fx.plane.state.list::<Instance>().unwrap().is_empty());
        let subnet: Subnet = fx.plane.state.fetch(&fx.private_subnet_id).unwrap();
        assert!(subnet.adapters.is_empty());
    }

    #[tokio::test]
    async fn explicit_host_must_be_in_zone() {
        let fx = Fixture::new(&["a", "b"], 1).await;
        let mut request = req(&fx, "web");
        request.host_id = Some(fx.hosts[1].id.clone());

        let err = fx.plane.instances.create(&fx.project_id, request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn siblings_land_on_different_hosts() {
        let fx = Fixture::new(&["a"], 2).await;
        let svc = &fx.plane.instances;

        let first = svc.create(&fx.project_id, req(&fx, "web-1")).await.unwrap();
        let second = svc.create(&fx.project_id, req(&fx, "web-2")).await.unwrap();
        assert_ne!(first.host_id, second.host_id);
    }

    #[tokio::test]
    async fn delete_undoes_create() {
        let fx = Fixture::new(&["a"], 1).await;
        let svc = &fx.plane.instances;
        let instance = svc.create(&fx.project_id, req(&fx, "web")).await.unwrap();

        svc.delete(&instance.meta.id).await.unwrap();

        assert_eq!(fx.hosts[0].conn.calls_to(methods::DELETE_INSTANCE), 1);
        assert!(fx.plane.state.list::<Adapter>().unwrap().is_empty());
        let host: Host = fx.plane.state.fetch(&fx.hosts[0].id).unwrap();
        assert_eq!(host.usage, HostUsage::default());
        let project: Project = fx.plane.state.fetch(&fx.project_id).unwrap();
        assert!(project.instances.is_empty());
        assert_eq!(project.usage.vcpus, 0);
        assert!(svc.get(&instance.meta.id).unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn failed_remote_delete_keeps_the_instance() {
        let fx = Fixture::new(&["a"], 1).await;
        let svc = &fx.plane.instances;
        let instance = svc.create(&fx.project_id, req(&fx, "web")).await.unwrap();
        fx.hosts[0].conn.fail(methods::DELETE_INSTANCE, "busy");

        assert!(svc.delete(&instance.meta.id).await.is_err());
        assert!(svc.get(&instance.meta.id).is_ok());
        assert_eq!(fx.plane.state.list::<Adapter>().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn power_actions_update_recorded_state() {
        let fx = Fixture::new(&["a"], 1).await;
        let svc = &fx.plane.instances;
        let instance = svc.create(&fx.project_id, req(&fx, "web")).await.unwrap();

        let stopped = svc.power(&instance.meta.id, PowerAction::Shutdown).await.unwrap();
        assert_eq!(stopped.power, PowerState::Stopped);
        assert_eq!(fx.hosts[0].conn.calls_to(methods::SHUTDOWN_INSTANCE), 1);

        let suspended = svc.power(&instance.meta.id, "suspend".parse().unwrap()).await.unwrap();
        assert_eq!(suspended.power, PowerState::Suspended);
        assert!("explode".parse::<PowerAction>().is_err());
    }

    #[tokio::test]
    async fn queries_decode_agent_replies() {
        let fx = Fixture::new(&["a"], 1).await;
        let svc = &fx.plane.instances;
        let instance = svc.create(&fx.project_id, req(&fx, "web")).await.unwrap();
        let conn = &fx.hosts[0].conn;
        conn.respond(methods::GET_INSTANCE_STATE, json!({ "state": "running" }));
        conn.respond(methods::IS_INSTANCE_RUNNING, json!({ "running": true }));
        conn.respond(
            methods::GET_INSTANCE_REMOTE_CONNECTION_URL,
            json!({ "url": "spice://10.0.0.5:5900" }),
        );

        assert_eq!(svc.state(&instance.meta.id).await.unwrap(), "running");
        assert!(svc.is_running(&instance.meta.id).await.unwrap());
        assert_eq!(
            svc.remote_console_url(&instance.meta.id).await.unwrap(),
            "spice://10.0.0.5:5900"
        );
        svc.set_auto_start(&instance.meta.id, true).await.unwrap();
        assert_eq!(conn.calls_to(methods::SET_INSTANCE_AUTO_START), 1);
    }

    #[tokio::test]
    async fn malformed_reply_is_a_dispatch_error() {
        let fx = Fixture::new(&["a"], 1).await;
        let svc = &fx.plane.instances;
        let instance = svc.create(&fx.project_id, req(&fx, "web")).await.unwrap();
        fx.hosts[0].conn.respond(methods::IS_INSTANCE_RUNNING, json!("yes"));

        let err = svc.is_running(&instance.meta.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Dispatch);
    }
}
