//! RPC methods the control plane calls on agents, and their payloads.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

pub const CAPABILITIES: &str = "Capabilities";
pub const NODE_CAPABILITIES: &str = "NodeCapabilities";

// Instance lifecycle.
pub const CREATE_INSTANCE: &str = "CreateInstance";
pub const GET_INSTANCE: &str = "GetInstance";
pub const UPDATE_INSTANCE: &str = "UpdateInstance";
pub const DELETE_INSTANCE: &str = "DeleteInstance";
pub const GET_INSTANCE_STATE: &str = "GetInstanceState";
pub const GET_INSTANCE_REMOTE_CONNECTION_URL: &str = "GetInstanceRemoteConnectionUrl";
pub const IS_INSTANCE_RUNNING: &str = "IsInstanceRunning";
pub const SET_INSTANCE_AUTO_START: &str = "SetInstanceAutoStart";
pub const START_INSTANCE: &str = "StartInstance";
pub const REBOOT_INSTANCE: &str = "RebootInstance";
pub const RESET_INSTANCE: &str = "ResetInstance";
pub const SUSPEND_INSTANCE: &str = "SuspendInstance";
pub const RESUME_INSTANCE: &str = "ResumeInstance";
pub const SHUTDOWN_INSTANCE: &str = "ShutdownInstance";
pub const STOP_INSTANCE: &str = "StopInstance";

// Storage.
pub const POOL_STATS: &str = "PoolStats";
pub const CREATE_RAW_VOLUME: &str = "CreateRawVolume";
pub const CREATE_TEMPLATE_VOLUME: &str = "CreateTemplateVolume";
pub const CREATE_OS_VOLUME: &str = "CreateOsVolume";
pub const CREATE_ISO_VOLUME: &str = "CreateIsoVolume";
pub const RESIZE_VOLUME: &str = "ResizeVolume";
pub const DELETE_VOLUME: &str = "DeleteVolume";
pub const UPDATE_ISO_VOLUME: &str = "UpdateIsoVolume";

// Filesystem exports.
pub const LIST_FILE_SYSTEMS: &str = "ListFileSystems";
pub const LIST_SUB_VOLUMES: &str = "ListSubVolumes";
pub const CREATE_SUB_VOLUME: &str = "CreateSubVolume";
pub const DELETE_SUB_VOLUME: &str = "DeleteSubVolume";
pub const CREATE_NFS_BACKEND: &str = "CreateNfsBackend";
pub const UPDATE_NFS_BACKEND: &str = "UpdateNfsBackend";
pub const DELETE_NFS_BACKEND: &str = "DeleteNfsBackend";

// DNS.
pub const CREATE_DNS_ZONE: &str = "CreateDnsZone";
pub const DELETE_DNS_ZONE: &str = "DeleteDnsZone";
pub const CREATE_DNS_RECORD: &str = "CreateDnsRecord";
pub const UPDATE_DNS_RECORD: &str = "UpdateDnsRecord";
pub const DELETE_DNS_RECORD: &str = "DeleteDnsRecord";

// Network gateways.
pub const RELOAD_CONFIG: &str = "ReloadConfig";

/// Every method of the catalog.
pub const ALL: &[&str] = &[
    CAPABILITIES,
    NODE_CAPABILITIES,
    CREATE_INSTANCE,
    GET_INSTANCE,
    UPDATE_INSTANCE,
    DELETE_INSTANCE,
    GET_INSTANCE_STATE,
    GET_INSTANCE_REMOTE_CONNECTION_URL,
    IS_INSTANCE_RUNNING,
    SET_INSTANCE_AUTO_START,
    START_INSTANCE,
    REBOOT_INSTANCE,
    RESET_INSTANCE,
    SUSPEND_INSTANCE,
    RESUME_INSTANCE,
    SHUTDOWN_INSTANCE,
    STOP_INSTANCE,
    POOL_STATS,
    CREATE_RAW_VOLUME,
    CREATE_TEMPLATE_VOLUME,
    CREATE_OS_VOLUME,
    CREATE_ISO_VOLUME,
    RESIZE_VOLUME,
    DELETE_VOLUME,
    UPDATE_ISO_VOLUME,
    LIST_FILE_SYSTEMS,
    LIST_SUB_VOLUMES,
    CREATE_SUB_VOLUME,
    DELETE_SUB_VOLUME,
    CREATE_NFS_BACKEND,
    UPDATE_NFS_BACKEND,
    DELETE_NFS_BACKEND,
    CREATE_DNS_ZONE,
    DELETE_DNS_ZONE,
    CREATE_DNS_RECORD,
    UPDATE_DNS_RECORD,
    DELETE_DNS_RECORD,
    RELOAD_CONFIG,
];

/// Reply to the `Capabilities` handshake.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapabilitiesReply {
    pub methods: Vec<String>,
    pub version: String,
}

/// Reply to `NodeCapabilities`: the host's hardware.
pub type NodeCapabilitiesReply = cumulus_state::HostCapabilities;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolStatsArgs {
    pub pool: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolStatsReply {
    pub capacity_bytes: u64,
    pub allocated_bytes: u64,
    pub available_bytes: u64,
}

/// One network interface of an instance as seen by the hypervisor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InterfaceSpec {
    pub mac: String,
    pub addresses: Vec<Ipv4Addr>,
    pub bridge: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateInstanceArgs {
    pub id: String,
    pub name: String,
    pub vcpus: u32,
    pub memory_bytes: u64,
    pub interfaces: Vec<InterfaceSpec>,
}

/// Arguments of every call addressing a single instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceRef {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AutoStartArgs {
    pub id: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceStateReply {
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteConnectionReply {
    pub url: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct IsRunningReply {
    pub running: bool,
}
