//! Typed lifecycle state of infrastructure resources.
//!
//! Raw records from the orchestrator are untyped JSON objects whose state
//! fields differ per kind. [`ResourceState::from_raw`] maps them onto one
//! variant per kind so the action filters can match exhaustively.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::error::{ConsoleError, Result};

// =============================================================================
// Resource Kinds
// =============================================================================

/// Every resource kind the console manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Zone,
    Pod,
    Cluster,
    Host,
    PrimaryStorage,
    Router,
    InternalLbVm,
    SystemVm,
    NetworkServiceProvider,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 9] = [
        ResourceKind::Zone,
        ResourceKind::Pod,
        ResourceKind::Cluster,
        ResourceKind::Host,
        ResourceKind::PrimaryStorage,
        ResourceKind::Router,
        ResourceKind::InternalLbVm,
        ResourceKind::SystemVm,
        ResourceKind::NetworkServiceProvider,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Zone => "zone",
            ResourceKind::Pod => "pod",
            ResourceKind::Cluster => "cluster",
            ResourceKind::Host => "host",
            ResourceKind::PrimaryStorage => "primary-storage",
            ResourceKind::Router => "router",
            ResourceKind::InternalLbVm => "internal-lb-vm",
            ResourceKind::SystemVm => "system-vm",
            ResourceKind::NetworkServiceProvider => "network-service-provider",
        }
    }

    /// Orchestrator command that lists resources of this kind.
    pub fn list_command(&self) -> &'static str {
        match self {
            ResourceKind::Zone => "listZones",
            ResourceKind::Pod => "listPods",
            ResourceKind::Cluster => "listClusters",
            ResourceKind::Host => "listHosts",
            ResourceKind::PrimaryStorage => "listStoragePools",
            ResourceKind::Router => "listRouters",
            ResourceKind::InternalLbVm => "listInternalLoadBalancerVMs",
            ResourceKind::SystemVm => "listSystemVms",
            ResourceKind::NetworkServiceProvider => "listNetworkServiceProviders",
        }
    }

    /// Key of the item array inside a list response.
    pub fn item_key(&self) -> &'static str {
        match self {
            ResourceKind::Zone => "zone",
            ResourceKind::Pod => "pod",
            ResourceKind::Cluster => "cluster",
            ResourceKind::Host => "host",
            ResourceKind::PrimaryStorage => "storagepool",
            ResourceKind::Router => "router",
            ResourceKind::InternalLbVm => "internalloadbalancervm",
            ResourceKind::SystemVm => "systemvm",
            ResourceKind::NetworkServiceProvider => "networkserviceprovider",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = ConsoleError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        ResourceKind::ALL
            .into_iter()
            .find(|k| k.as_str() == normalized || k.item_key() == normalized)
            .ok_or_else(|| ConsoleError::Config(format!("unknown resource kind '{}'", s)))
    }
}

// =============================================================================
// Lifecycle Enums
// =============================================================================

/// Declares a lifecycle enum whose known values map 1:1 to orchestrator
/// strings. Anything else, including a missing field, lands in `Unknown`.
macro_rules! lifecycle_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant,)+
            Unknown(String),
        }

        impl $name {
            pub fn parse(value: Option<&str>) -> Self {
                match value.unwrap_or_default() {
                    $($text => $name::$variant,)+
                    other => $name::Unknown(other.to_string()),
                }
            }

            pub fn as_str(&self) -> &str {
                match self {
                    $($name::$variant => $text,)+
                    $name::Unknown(other) => other.as_str(),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }
    };
}

lifecycle_enum! {
    /// `allocationstate` of zones, pods and clusters.
    AllocationState {
        Enabled => "Enabled",
        Disabled => "Disabled",
    }
}

lifecycle_enum! {
    /// `managedstate` of a cluster.
    ManagedState {
        Managed => "Managed",
        Unmanaged => "Unmanaged",
        PrepareUnmanaged => "PrepareUnmanaged",
        PrepareUnmanagedError => "PrepareUnmanagedError",
    }
}

lifecycle_enum! {
    /// Collapsed cluster state, see [`ClusterState::derive`].
    ClusterState {
        Enabled => "Enabled",
        Disabled => "Disabled",
        Unmanaged => "Unmanaged",
        PrepareUnmanaged => "PrepareUnmanaged",
        PrepareUnmanagedError => "PrepareUnmanagedError",
    }
}

lifecycle_enum! {
    /// `resourcestate` of a host.
    HostResourceState {
        Enabled => "Enabled",
        Disabled => "Disabled",
        Maintenance => "Maintenance",
        PrepareForMaintenance => "PrepareForMaintenance",
        ErrorInMaintenance => "ErrorInMaintenance",
    }
}

lifecycle_enum! {
    /// Connection `state` of a host agent.
    HostStatus {
        Up => "Up",
        Down => "Down",
        Alert => "Alert",
        Disconnected => "Disconnected",
        Connecting => "Connecting",
    }
}

lifecycle_enum! {
    /// `state` of a primary storage pool.
    StoragePoolState {
        Up => "Up",
        Down => "Down",
        Connecting => "Connecting",
        Alert => "Alert",
        Disconnected => "Disconnected",
        ErrorInMaintenance => "ErrorInMaintenance",
        PrepareForMaintenance => "PrepareForMaintenance",
        Maintenance => "Maintenance",
    }
}

lifecycle_enum! {
    /// Power `state` of routers, internal LB VMs and system VMs.
    VmState {
        Running => "Running",
        Stopped => "Stopped",
        Error => "Error",
        Destroyed => "Destroyed",
    }
}

lifecycle_enum! {
    /// `state` of a network service provider.
    ProviderState {
        Enabled => "Enabled",
        Disabled => "Disabled",
    }
}

impl ClusterState {
    /// A cluster reports `allocationstate` while managed and its
    /// `managedstate` otherwise. Never both.
    pub fn derive(allocation: &AllocationState, managed: &ManagedState) -> Self {
        match managed {
            ManagedState::Managed => ClusterState::parse(Some(allocation.as_str())),
            other => ClusterState::parse(Some(other.as_str())),
        }
    }
}

/// Exclusive ownership of a resource by a domain (and optionally an account).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Dedication {
    #[default]
    Shared,
    Dedicated {
        domain_id: String,
        account: Option<String>,
    },
}

impl Dedication {
    fn from_raw(raw: &Value) -> Self {
        match str_field(raw, "domainid") {
            Some(domain_id) => Dedication::Dedicated {
                domain_id: domain_id.to_string(),
                account: str_field(raw, "account").map(str::to_string),
            },
            None => Dedication::Shared,
        }
    }

    pub fn is_dedicated(&self) -> bool {
        matches!(self, Dedication::Dedicated { .. })
    }
}

// =============================================================================
// Per-Kind Snapshots
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Zone {
    pub id: String,
    pub name: String,
    pub allocation: AllocationState,
    pub dedication: Dedication,
    /// VMware datacenter bound to this zone, if any.
    pub vmware_dc: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pod {
    pub id: String,
    pub name: String,
    pub allocation: AllocationState,
    pub dedication: Dedication,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cluster {
    pub id: String,
    pub name: String,
    pub allocation: AllocationState,
    pub managed: ManagedState,
    pub state: ClusterState,
    pub dedication: Dedication,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Host {
    pub id: String,
    pub name: String,
    pub resource_state: HostResourceState,
    pub status: HostStatus,
    pub dedication: Dedication,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrimaryStorage {
    pub id: String,
    pub name: String,
    pub state: StoragePoolState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Router {
    pub id: String,
    pub name: String,
    pub state: VmState,
    pub vpc_id: Option<String>,
    pub is_redundant_router: bool,
    /// `redundantstate` for redundant routers, empty for everything else.
    pub redundant_router_state: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InternalLbVm {
    pub id: String,
    pub name: String,
    pub state: VmState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemVm {
    pub id: String,
    pub name: String,
    pub state: VmState,
    pub system_vm_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkServiceProvider {
    /// Empty when the provider has not been created on the physical network.
    pub id: String,
    pub name: String,
    pub physical_network_id: String,
    pub state: ProviderState,
}

impl NetworkServiceProvider {
    /// Placeholder for a provider the orchestrator does not know yet.
    pub fn absent(name: &str, physical_network_id: &str) -> Self {
        Self {
            id: String::new(),
            name: name.to_string(),
            physical_network_id: physical_network_id.to_string(),
            state: ProviderState::Unknown(String::new()),
        }
    }

    pub fn is_present(&self) -> bool {
        !self.id.is_empty()
    }
}

/// Lifecycle-relevant snapshot of one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ResourceState {
    Zone(Zone),
    Pod(Pod),
    Cluster(Cluster),
    Host(Host),
    PrimaryStorage(PrimaryStorage),
    Router(Router),
    InternalLbVm(InternalLbVm),
    SystemVm(SystemVm),
    NetworkServiceProvider(NetworkServiceProvider),
}

impl ResourceState {
    /// Map a raw orchestrator record onto the typed state of `kind`.
    pub fn from_raw(kind: ResourceKind, raw: &Value) -> Result<Self> {
        if !raw.is_object() {
            return Err(ConsoleError::MalformedResponse(format!(
                "{} record is not an object",
                kind
            )));
        }
        let id = str_field(raw, "id")
            .map(str::to_string)
            .ok_or_else(|| ConsoleError::MalformedResponse(format!("{} record has no id", kind)))?;
        let name = str_field(raw, "name").unwrap_or_default().to_string();

        let state = match kind {
            ResourceKind::Zone => ResourceState::Zone(Zone {
                id,
                name,
                allocation: AllocationState::parse(str_field(raw, "allocationstate")),
                dedication: Dedication::from_raw(raw),
                vmware_dc: str_field(raw, "vmwaredcId")
                    .or_else(|| str_field(raw, "vmwaredcid"))
                    .map(str::to_string),
            }),
            ResourceKind::Pod => ResourceState::Pod(Pod {
                id,
                name,
                allocation: AllocationState::parse(str_field(raw, "allocationstate")),
                dedication: Dedication::from_raw(raw),
            }),
            ResourceKind::Cluster => {
                let allocation = AllocationState::parse(str_field(raw, "allocationstate"));
                let managed = ManagedState::parse(str_field(raw, "managedstate"));
                let state = ClusterState::derive(&allocation, &managed);
                ResourceState::Cluster(Cluster {
                    id,
                    name,
                    allocation,
                    managed,
                    state,
                    dedication: Dedication::from_raw(raw),
                })
            }
            ResourceKind::Host => ResourceState::Host(Host {
                id,
                name,
                resource_state: HostResourceState::parse(str_field(raw, "resourcestate")),
                status: HostStatus::parse(str_field(raw, "state")),
                dedication: Dedication::from_raw(raw),
            }),
            ResourceKind::PrimaryStorage => ResourceState::PrimaryStorage(PrimaryStorage {
                id,
                name,
                state: StoragePoolState::parse(str_field(raw, "state")),
            }),
            ResourceKind::Router => {
                let is_redundant_router = bool_field(raw, "isredundantrouter");
                let redundant_router_state = if is_redundant_router {
                    str_field(raw, "redundantstate").unwrap_or_default().to_string()
                } else {
                    String::new()
                };
                ResourceState::Router(Router {
                    id,
                    name,
                    state: VmState::parse(str_field(raw, "state")),
                    vpc_id: str_field(raw, "vpcid").map(str::to_string),
                    is_redundant_router,
                    redundant_router_state,
                })
            }
            ResourceKind::InternalLbVm => ResourceState::InternalLbVm(InternalLbVm {
                id,
                name,
                state: VmState::parse(str_field(raw, "state")),
            }),
            ResourceKind::SystemVm => ResourceState::SystemVm(SystemVm {
                id,
                name,
                state: VmState::parse(str_field(raw, "state")),
                system_vm_type: str_field(raw, "systemvmtype").map(str::to_string),
            }),
            ResourceKind::NetworkServiceProvider => {
                ResourceState::NetworkServiceProvider(NetworkServiceProvider {
                    id,
                    name,
                    physical_network_id: str_field(raw, "physicalnetworkid")
                        .unwrap_or_default()
                        .to_string(),
                    state: ProviderState::parse(str_field(raw, "state")),
                })
            }
        };
        Ok(state)
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceState::Zone(_) => ResourceKind::Zone,
            ResourceState::Pod(_) => ResourceKind::Pod,
            ResourceState::Cluster(_) => ResourceKind::Cluster,
            ResourceState::Host(_) => ResourceKind::Host,
            ResourceState::PrimaryStorage(_) => ResourceKind::PrimaryStorage,
            ResourceState::Router(_) => ResourceKind::Router,
            ResourceState::InternalLbVm(_) => ResourceKind::InternalLbVm,
            ResourceState::SystemVm(_) => ResourceKind::SystemVm,
            ResourceState::NetworkServiceProvider(_) => ResourceKind::NetworkServiceProvider,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            ResourceState::Zone(r) => &r.id,
            ResourceState::Pod(r) => &r.id,
            ResourceState::Cluster(r) => &r.id,
            ResourceState::Host(r) => &r.id,
            ResourceState::PrimaryStorage(r) => &r.id,
            ResourceState::Router(r) => &r.id,
            ResourceState::InternalLbVm(r) => &r.id,
            ResourceState::SystemVm(r) => &r.id,
            ResourceState::NetworkServiceProvider(r) => &r.id,
        }
    }
}

// =============================================================================
// Field Helpers
// =============================================================================

/// Non-empty string field.
pub(crate) fn str_field<'a>(raw: &'a Value, key: &str) -> Option<&'a str> {
    match raw.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.as_str()),
        _ => None,
    }
}

fn bool_field(raw: &Value, key: &str) -> bool {
    match raw.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}
