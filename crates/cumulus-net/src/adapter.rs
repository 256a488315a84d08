//! Virtual network adapter lifecycle.

use cumulus_state::{Adapter, DocumentMeta, Subnet};
use rand::Rng;
use tracing::{info, warn};

use crate::allocator::AddressAllocator;
use crate::error::{NetError, NetResult};

/// Attempts at drawing a MAC not yet used in the subnet.
const MAC_ATTEMPTS: usize = 16;

/// Parameters for a new adapter.
#[derive(Debug, Clone, Default)]
pub struct AdapterRequest {
    pub name: String,
    /// Fixed MAC; a random one is generated when absent.
    pub mac: Option<String>,
    /// Reserved adapters back virtual IPs and may share a MAC.
    pub reserved: bool,
    pub instance_id: Option<String>,
}

/// Random locally-administered MAC in the `52:54:00` prefix.
pub fn generate_mac() -> String {
    let tail: [u8; 3] = rand::thread_rng().r#gen();
    format!("52:54:00:{:02x}:{:02x}:{:02x}", tail[0], tail[1], tail[2])
}

impl AddressAllocator {
    fn macs_in_subnet(&self, subnet: &Subnet) -> NetResult<Vec<String>> {
        let (adapters, _) = self.state.resolve::<Adapter>(&subnet.adapters)?;
        Ok(adapters.into_iter().map(|a| a.mac).collect())
    }

    /// Create an adapter holding one freshly allocated address of the subnet.
    pub fn create_adapter(&self, subnet_id: &str, req: AdapterRequest) -> NetResult<Adapter> {
        let mut subnet: Subnet = self.state.fetch(subnet_id)?;
        let used = self.macs_in_subnet(&subnet)?;

        let mac = match req.mac {
            Some(mac) => {
                if !req.reserved && used.contains(&mac) {
                    return Err(NetError::DuplicateMac {
                        mac,
                        subnet: subnet.name.clone(),
                    });
                }
                mac
            }
            None => {
                let mut mac = generate_mac();
                for _ in 1..MAC_ATTEMPTS {
                    if req.reserved || !used.contains(&mac) {
                        break;
                    }
                    mac = generate_mac();
                }
                if !req.reserved && used.contains(&mac) {
                    return Err(NetError::DuplicateMac {
                        mac,
                        subnet: subnet.name.clone(),
                    });
                }
                mac
            }
        };

        let address = self.allocate(subnet_id)?;
        let mut adapter = Adapter {
            meta: DocumentMeta::default(),
            name: req.name,
            subnet_id: subnet_id.to_string(),
            mac,
            addresses: vec![address],
            reserved: req.reserved,
            instance_id: req.instance_id,
        };
        self.state.insert(&mut adapter)?;

        subnet.adapters.push(adapter.meta.id.clone());
        if let Err(e) = self.state.update(&mut subnet) {
            self.state.delete::<Adapter>(&adapter.meta.id)?;
            return Err(e.into());
        }

        info!(
            adapter_id = %adapter.meta.id,
            subnet = %subnet.name,
            %address,
            mac = %adapter.mac,
            reserved = adapter.reserved,
            "adapter created"
        );
        Ok(adapter)
    }

    /// Unlink an adapter from its subnet and delete it. Returns false if it
    /// did not exist.
    pub fn delete_adapter(&self, adapter_id: &str) -> NetResult<bool> {
        let Some(adapter) = self.state.get::<Adapter>(adapter_id)? else {
            return Ok(false);
        };

        match self.state.get::<Subnet>(&adapter.subnet_id)? {
            Some(mut subnet) => {
                subnet.adapters.retain(|id| id != adapter_id);
                self.state.update(&mut subnet)?;
            }
            None => warn!(%adapter_id, subnet_id = %adapter.subnet_id, "adapter references missing subnet"),
        }

        let existed = self.state.delete::<Adapter>(adapter_id)?;
        info!(%adapter_id, "adapter deleted");
        Ok(existed)
    }
}
