//! Project reconciliation: repair references left dangling by partial
//! failures or out-of-band deletes.

use cumulus_state::{CoordinatedResource, Instance, Project, ProjectUsage, StateStore};
use serde::Serialize;
use tracing::info;

use crate::coordinator::assign_masters;
use crate::error::OrchestratorResult;

/// What a reconciliation pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub dropped_instances: Vec<String>,
    pub dropped_coordinated: Vec<String>,
    /// Member instance ids removed from coordinated resources.
    pub dropped_members: Vec<String>,
    pub usage: ProjectUsage,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.dropped_instances.is_empty() && self.dropped_coordinated.is_empty() && self.dropped_members.is_empty()
    }
}

#[derive(Clone)]
pub struct Reconciler {
    state: StateStore,
}

impl Reconciler {
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }

    /// Drop dangling instance and resource ids from a project, rebuild its
    /// usage from the instances that exist, and drop members whose instance
    /// is gone from its coordinated resources.
    pub fn reconcile_project(&self, id: &str) -> OrchestratorResult<ReconcileReport> {
        let mut project: Project = self.state.fetch(id)?;
        let (instances, dropped_instances) = self.state.resolve::<Instance>(&project.instances)?;
        let (resources, dropped_coordinated) = self.state.resolve::<CoordinatedResource>(&project.coordinated)?;

        let mut usage = ProjectUsage {
            storage_bytes: project.usage.storage_bytes,
            ..Default::default()
        };
        for instance in &instances {
            usage.instances += 1;
            usage.vcpus += instance.vcpus;
            usage.memory_bytes += instance.memory_bytes;
        }

        if !dropped_instances.is_empty() || !dropped_coordinated.is_empty() || usage != project.usage {
            project.instances.retain(|i| !dropped_instances.contains(i));
            project.coordinated.retain(|c| !dropped_coordinated.contains(c));
            project.usage = usage;
            self.state.update(&mut project)?;
        }

        let mut dropped_members = Vec::new();
        for mut resource in resources {
            let member_ids: Vec<String> = resource.members.iter().map(|m| m.instance_id.clone()).collect();
            let (_, missing) = self.state.resolve::<Instance>(&member_ids)?;
            if missing.is_empty() {
                continue;
            }
            resource.members.retain(|m| !missing.contains(&m.instance_id));
            assign_masters(&mut resource);
            self.state.update(&mut resource)?;
            dropped_members.extend(missing);
        }

        let report = ReconcileReport {
            dropped_instances,
            dropped_coordinated,
            dropped_members,
            usage,
        };
        if !report.is_clean() {
            info!(
                project = %project.name,
                instances = report.dropped_instances.len(),
                coordinated = report.dropped_coordinated.len(),
                members = report.dropped_members.len(),
                "project reconciled"
            );
        }
        Ok(report)
    }

    /// Reconcile every project. Returns the number that needed repair.
    pub fn reconcile_all(&self) -> OrchestratorResult<usize> {
        let mut repaired = 0;
        for project in self.state.list::<Project>()? {
            if !self.reconcile_project(&project.meta.id)?.is_clean() {
                repaired += 1;
            }
        }
        Ok(repaired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cumulus_state::{
        CoordinatedKind, Cost, DocumentMeta, MasterPolicy, Member, PowerState, ResourcePhase, VirtualIp,
    };
    use std::net::Ipv4Addr;

    fn instance(state: &StateStore, id: &str, vcpus: u32) {
        let mut i = Instance {
            meta: DocumentMeta::with_id(id),
            name: id.into(),
            project_id: "p1".into(),
            zone_id: "z".into(),
            host_id: "h".into(),
            vcpus,
            memory_bytes: 0,
            adapters: vec![],
            power: PowerState::Running,
            cost: Cost::default(),
        };
        state.insert(&mut i).unwrap();
    }

    fn setup() -> (StateStore, Reconciler) {
        let state = StateStore::open_in_memory().unwrap();
        instance(&state, "i1", 2);
        instance(&state, "i2", 4);

        let mut resource = CoordinatedResource {
            meta: DocumentMeta::with_id("c1"),
            name: "svc".into(),
            kind: CoordinatedKind::HighlyAvailable,
            project_id: "p1".into(),
            region_id: "r".into(),
            phase: ResourcePhase::Active,
            vcpus: 2,
            memory_bytes: 0,
            master_policy: MasterPolicy::FirstMember,
            members: ["gone", "i1"]
                .iter()
                .map(|id| Member {
                    instance_id: id.to_string(),
                    zone_id: "z".into(),
                    host_id: "h".into(),
                })
                .collect(),
            adapters: vec![],
            virtual_ips: vec![VirtualIp {
                vrrp_id: 1,
                interface: "br0".into(),
                address: Ipv4Addr::new(10, 0, 0, 10),
                netmask: 24,
                public: false,
                zone_id: None,
                master: Some("gone".into()),
            }],
        };
        state.insert(&mut resource).unwrap();

        let mut project = Project {
            meta: DocumentMeta::with_id("p1"),
            name: "acme".into(),
            instances: vec!["i1".into(), "gone".into(), "i2".into()],
            coordinated: vec!["c1".into(), "c-missing".into()],
            usage: ProjectUsage {
                instances: 3,
                vcpus: 7,
                ..Default::default()
            },
            ..Default::default()
        };
        state.insert(&mut project).unwrap();
        (state.clone(), Reconciler::new(state))
    }

    #[test]
    fn dangling_references_are_dropped() {
        let (state, reconciler) = setup();
        let report = reconciler.reconcile_project("p1").unwrap();

        assert_eq!(report.dropped_instances, vec!["gone".to_string()]);
        assert_eq!(report.dropped_coordinated, vec!["c-missing".to_string()]);
        assert_eq!(report.dropped_members, vec!["gone".to_string()]);
        assert_eq!(report.usage.vcpus, 6);

        let project: Project = state.fetch("p1").unwrap();
        assert_eq!(project.instances, vec!["i1".to_string(), "i2".to_string()]);
        assert_eq!(project.coordinated, vec!["c1".to_string()]);
        assert_eq!(project.usage.instances, 2);

        let resource: CoordinatedResource = state.fetch("c1").unwrap();
        assert_eq!(resource.members.len(), 1);
        assert_eq!(resource.virtual_ips[0].master.as_deref(), Some("i1"));
    }

    #[test]
    fn second_pass_is_clean() {
        let (_, reconciler) = setup();
        assert_eq!(reconciler.reconcile_all().unwrap(), 1);
        assert!(reconciler.reconcile_project("p1").unwrap().is_clean());
        assert_eq!(reconciler.reconcile_all().unwrap(), 0);
    }
}
