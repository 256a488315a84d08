//! Project service: tenants, their quotas and private subnet leases.

use cumulus_net::assign_zone_gateways;
use cumulus_state::{Project, ProjectQuotas, Region, StateStore, Subnet, Zone};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{OrchestratorError, OrchestratorResult};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateProject {
    pub name: String,
    #[serde(default)]
    pub quotas: ProjectQuotas,
    /// Regions the project gets a private subnet in.
    #[serde(default)]
    pub regions: Vec<String>,
}

#[derive(Clone)]
pub struct ProjectService {
    state: StateStore,
}

impl ProjectService {
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }

    /// Create a project and lease one private subnet in every requested
    /// region. Nothing is kept if any region cannot be served.
    pub fn create(&self, req: CreateProject) -> OrchestratorResult<Project> {
        if self.state.find_one(|p: &Project| p.name == req.name)?.is_some() {
            return Err(OrchestratorError::Conflict(format!("project {} already exists", req.name)));
        }

        let mut project = Project {
            name: req.name,
            quotas: req.quotas,
            ..Default::default()
        };
        self.state.insert(&mut project)?;

        let mut leased = Vec::new();
        for region_id in &req.regions {
            match self.lease_subnet(&mut project, region_id) {
                Ok(subnet_id) => leased.push(subnet_id),
                Err(e) => {
                    self.release_leases(&leased);
                    if let Err(cleanup) = self.state.delete::<Project>(&project.meta.id) {
                        warn!(project_id = %project.meta.id, error = %cleanup, "failed to remove partial project");
                    }
                    return Err(e);
                }
            }
        }
        if let Err(e) = self.state.update(&mut project) {
            self.release_leases(&leased);
            let _ = self.state.delete::<Project>(&project.meta.id);
            return Err(e.into());
        }

        info!(
            project_id = %project.meta.id,
            name = %project.name,
            subnets = leased.len(),
            "project created"
        );
        Ok(project)
    }

    /// Lease the first free private subnet of a region and record the zone
    /// gateways drawn from its gateway pool.
    fn lease_subnet(&self, project: &mut Project, region_id: &str) -> OrchestratorResult<String> {
        let region: Region = self.state.fetch(region_id)?;
        if project.private_subnets.contains_key(region_id) {
            return Err(OrchestratorError::BadRequest(format!(
                "region {} requested twice",
                region.name
            )));
        }

        let mut candidates = self
            .state
            .find(|s: &Subnet| !s.public && s.region_id == region_id && s.project_id.is_none())?;
        candidates.sort_by(|a, b| a.name.cmp(&b.name));
        let Some(mut subnet) = candidates.into_iter().next() else {
            return Err(OrchestratorError::InvalidConfig(format!(
                "region {} has no free private subnet",
                region.name
            )));
        };

        let (zones, _) = self.state.resolve::<Zone>(&region.zones)?;
        let mut zone_names: Vec<String> = zones.into_iter().map(|z| z.name).collect();
        zone_names.sort();
        let gateways = assign_zone_gateways(&subnet, &zone_names)?;

        subnet.project_id = Some(project.meta.id.clone());
        self.state.update(&mut subnet)?;

        project.private_subnets.insert(region_id.to_string(), subnet.meta.id.clone());
        project.zone_gateways.extend(gateways);
        info!(project = %project.name, subnet = %subnet.name, region = %region.name, "private subnet leased");
        Ok(subnet.meta.id)
    }

    fn release_leases(&self, subnet_ids: &[String]) {
        for id in subnet_ids {
            let released = self.state.modify(id, |s: &mut Subnet| s.project_id = None);
            if let Err(e) = released {
                warn!(subnet_id = %id, error = %e, "failed to release subnet lease");
            }
        }
    }

    pub fn get(&self, id: &str) -> OrchestratorResult<Project> {
        Ok(self.state.fetch(id)?)
    }

    pub fn list(&self) -> OrchestratorResult<Vec<Project>> {
        Ok(self.state.list()?)
    }

    pub fn set_quotas(&self, id: &str, quotas: ProjectQuotas) -> OrchestratorResult<Project> {
        self.state.modify(id, |p: &mut Project| p.quotas = quotas)?;
        Ok(self.state.fetch(id)?)
    }

    /// Delete an empty project and release its subnet leases.
    pub fn delete(&self, id: &str) -> OrchestratorResult<()> {
        let project: Project = self.state.fetch(id)?;
        if !project.instances.is_empty() || !project.coordinated.is_empty() {
            return Err(OrchestratorError::Conflict(format!(
                "project {} still has {} instance(s) and {} coordinated resource(s)",
                project.name,
                project.instances.len(),
                project.coordinated.len()
            )));
        }

        for subnet_id in project.private_subnets.values() {
            match self.state.get::<Subnet>(subnet_id)? {
                Some(mut subnet) if subnet.project_id.as_deref() == Some(id) => {
                    subnet.project_id = None;
                    self.state.update(&mut subnet)?;
                }
                Some(_) => warn!(%subnet_id, project = %project.name, "subnet lease held by another project"),
                None => warn!(%subnet_id, project = %project.name, "project references missing subnet"),
            }
        }
        self.state.delete::<Project>(id)?;
        info!(project_id = %id, name = %project.name, "project deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use cumulus_state::{AddressRange, DocumentMeta};
    use std::net::Ipv4Addr;

    struct Fixture {
        state: StateStore,
        projects: ProjectService,
    }

    fn fixture() -> Fixture {
        let state = StateStore::open_in_memory().unwrap();
        let mut region = Region {
            meta: DocumentMeta::with_id("r1"),
            name: "eu".into(),
            zones: vec!["z-b".into(), "z-a".into()],
            ..Default::default()
        };
        state.insert(&mut region).unwrap();
        for (id, name) in [("z-a", "a"), ("z-b", "b")] {
            let mut zone = Zone {
                meta: DocumentMeta::with_id(id),
                name: name.into(),
                region_id: "r1".into(),
                ..Default::default()
            };
            state.insert(&mut zone).unwrap();
        }
        for (id, third) in [("lan-1", 1u8), ("lan-2", 2u8)] {
            let mut subnet = Subnet::new(
                id,
                "r1",
                &format!("10.{third}.0.0/24"),
                Ipv4Addr::new(10, third, 0, 1),
            );
            subnet.meta.id = id.into();
            subnet.gateway_pool = vec![
                AddressRange::new(Ipv4Addr::new(10, third, 0, 2), Ipv4Addr::new(10, third, 0, 4)).unwrap(),
            ];
            state.insert(&mut subnet).unwrap();
        }
        Fixture {
            projects: ProjectService::new(state.clone()),
            state,
        }
    }

    fn req(name: &str, regions: &[&str]) -> CreateProject {
        CreateProject {
            name: name.into(),
            quotas: ProjectQuotas::default(),
            regions: regions.iter().map(|r| r.to_string()).collect(),
        }
    }

    #[test]
    fn create_leases_subnet_and_assigns_gateways() {
        let fx = fixture();
        let project = fx.projects.create(req("acme", &["r1"])).unwrap();

        assert_eq!(project.private_subnets.get("r1").map(String::as_str), Some("lan-1"));
        assert_eq!(project.zone_gateways.get("a"), Some(&Ipv4Addr::new(10, 1, 0, 2)));
        assert_eq!(project.zone_gateways.get("b"), Some(&Ipv4Addr::new(10, 1, 0, 3)));

        let subnet: Subnet = fx.state.fetch("lan-1").unwrap();
        assert_eq!(subnet.project_id.as_deref(), Some(project.meta.id.as_str()));

        // The next project gets the next free subnet.
        let other = fx.projects.create(req("globex", &["r1"])).unwrap();
        assert_eq!(other.private_subnets.get("r1").map(String::as_str), Some("lan-2"));
    }

    #[test]
    fn no_free_subnet_leaves_nothing_behind() {
        let fx = fixture();
        fx.projects.create(req("a", &["r1"])).unwrap();
        fx.projects.create(req("b", &["r1"])).unwrap();

        let err = fx.projects.create(req("c", &["r1"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
        assert!(fx.state.find_one(|p: &Project| p.name == "c").unwrap().is_none());
    }

    #[test]
    fn failed_region_releases_earlier_leases() {
        let fx = fixture();
        let err = fx.projects.create(req("acme", &["r1", "missing"])).unwrap_err();
        assert!(err.is_not_found());

        let subnet: Subnet = fx.state.fetch("lan-1").unwrap();
        assert_eq!(subnet.project_id, None);
        assert!(fx.projects.list().unwrap().is_empty());
    }

    #[test]
    fn duplicate_name_conflicts() {
        let fx = fixture();
        fx.projects.create(req("acme", &[])).unwrap();
        let err = fx.projects.create(req("acme", &[])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn delete_releases_lease_and_refuses_busy_projects() {
        let fx = fixture();
        let project = fx.projects.create(req("acme", &["r1"])).unwrap();

        fx.state
            .modify(&project.meta.id, |p: &mut Project| p.instances.push("i1".into()))
            .unwrap();
        let err = fx.projects.delete(&project.meta.id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        fx.state
            .modify(&project.meta.id, |p: &mut Project| p.instances.clear())
            .unwrap();
        fx.projects.delete(&project.meta.id).unwrap();

        let subnet: Subnet = fx.state.fetch("lan-1").unwrap();
        assert_eq!(subnet.project_id, None);
    }

    #[test]
    fn quotas_can_be_changed() {
        let fx = fixture();
        let project = fx.projects.create(req("acme", &[])).unwrap();
        let quotas = ProjectQuotas {
            vcpus: 16,
            ..Default::default()
        };
        let updated = fx.projects.set_quotas(&project.meta.id, quotas).unwrap();
        assert_eq!(updated.quotas.vcpus, 16);
    }
}
