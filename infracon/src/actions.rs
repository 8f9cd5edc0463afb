//! Action filters - which operations a resource offers in its current state.
//!
//! Every filter is a pure function over a [`ResourceState`] variant. Filters
//! never fail: a state they do not recognise yields the base set for the
//! kind, which callers treat as "no privileged actions available".

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::error::{ConsoleError, Result};
use crate::resource::{
    AllocationState, Cluster, ClusterState, Dedication, Host, HostResourceState, HostStatus,
    InternalLbVm, NetworkServiceProvider, Pod, PrimaryStorage, ProviderState, ResourceKind,
    ResourceState, Router, StoragePoolState, SystemVm, VmState, Zone,
};

/// An operation the console may offer on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    Add,
    AddVmwareDc,
    CancelMaintenanceMode,
    ChangeService,
    Dedicate,
    Destroy,
    Disable,
    Edit,
    Enable,
    EnableMaintenanceMode,
    EnableSwift,
    ForceReconnect,
    Manage,
    Migrate,
    Release,
    Remove,
    RemoveVmwareDc,
    Restart,
    ScaleUp,
    Start,
    Stop,
    Unmanage,
    ViewConsole,
}

impl Action {
    pub const ALL: [Action; 23] = [
        Action::Add,
        Action::AddVmwareDc,
        Action::CancelMaintenanceMode,
        Action::ChangeService,
        Action::Dedicate,
        Action::Destroy,
        Action::Disable,
        Action::Edit,
        Action::Enable,
        Action::EnableMaintenanceMode,
        Action::EnableSwift,
        Action::ForceReconnect,
        Action::Manage,
        Action::Migrate,
        Action::Release,
        Action::Remove,
        Action::RemoveVmwareDc,
        Action::Restart,
        Action::ScaleUp,
        Action::Start,
        Action::Stop,
        Action::Unmanage,
        Action::ViewConsole,
    ];

    /// Wire name as used by the console's action tables.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Add => "add",
            Action::AddVmwareDc => "addVmwareDc",
            Action::CancelMaintenanceMode => "cancelMaintenanceMode",
            Action::ChangeService => "changeService",
            Action::Dedicate => "dedicate",
            Action::Destroy => "destroy",
            Action::Disable => "disable",
            Action::Edit => "edit",
            Action::Enable => "enable",
            Action::EnableMaintenanceMode => "enableMaintenanceMode",
            Action::EnableSwift => "enableSwift",
            Action::ForceReconnect => "forceReconnect",
            Action::Manage => "manage",
            Action::Migrate => "migrate",
            Action::Release => "release",
            Action::Remove => "remove",
            Action::RemoveVmwareDc => "removeVmwareDc",
            Action::Restart => "restart",
            Action::ScaleUp => "scaleUp",
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Unmanage => "unmanage",
            Action::ViewConsole => "viewConsole",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ConsoleError;

    fn from_str(s: &str) -> Result<Self> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| ConsoleError::Config(format!("unknown action '{}'", s)))
    }
}

pub type ActionSet = BTreeSet<Action>;

/// Who is asking. Some actions are reserved for administrators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterContext {
    pub is_admin: bool,
}

impl FilterContext {
    pub fn admin() -> Self {
        Self { is_admin: true }
    }

    pub fn user() -> Self {
        Self { is_admin: false }
    }
}

// =============================================================================
// Entry Points
// =============================================================================

/// Actions permitted on `state` for the caller described by `ctx`.
pub fn actions_for(state: &ResourceState, ctx: &FilterContext) -> ActionSet {
    match state {
        ResourceState::Zone(zone) => zone_actions(zone),
        ResourceState::Pod(pod) => pod_actions(pod),
        ResourceState::Cluster(cluster) => cluster_actions(cluster),
        ResourceState::Host(host) => host_actions(host),
        ResourceState::PrimaryStorage(pool) => primary_storage_actions(pool),
        ResourceState::Router(router) => router_actions(router, ctx),
        ResourceState::InternalLbVm(vm) => internal_lb_vm_actions(vm, ctx),
        ResourceState::SystemVm(vm) => system_vm_actions(vm, ctx),
        ResourceState::NetworkServiceProvider(nsp) => provider_actions(nsp),
    }
}

/// Actions permitted on a raw orchestrator record. A record that cannot be
/// read as `kind` offers nothing.
pub fn actions_for_raw(kind: ResourceKind, raw: &Value, ctx: &FilterContext) -> ActionSet {
    match ResourceState::from_raw(kind, raw) {
        Ok(state) => actions_for(&state, ctx),
        Err(e) => {
            warn!(kind = %kind, error = %e, "Unreadable resource record, offering no actions");
            ActionSet::new()
        }
    }
}

/// Reject `action` unless the filter for `state` would have offered it.
pub fn ensure_permitted(state: &ResourceState, action: Action, ctx: &FilterContext) -> Result<()> {
    if actions_for(state, ctx).contains(&action) {
        Ok(())
    } else {
        Err(ConsoleError::InvalidStateTransition {
            kind: state.kind().to_string(),
            id: state.id().to_string(),
            action: action.to_string(),
        })
    }
}

// =============================================================================
// Per-Kind Filters
// =============================================================================

fn dedication_action(dedication: &Dedication) -> Action {
    if dedication.is_dedicated() {
        Action::Release
    } else {
        Action::Dedicate
    }
}

pub fn zone_actions(zone: &Zone) -> ActionSet {
    let mut actions = ActionSet::new();
    match zone.allocation {
        AllocationState::Enabled => {
            actions.insert(Action::Disable);
        }
        AllocationState::Disabled => {
            actions.insert(Action::Enable);
        }
        AllocationState::Unknown(_) => return actions,
    }
    actions.extend([Action::Edit, Action::Remove, Action::EnableSwift]);
    actions.insert(dedication_action(&zone.dedication));
    actions.insert(if zone.vmware_dc.is_some() {
        Action::RemoveVmwareDc
    } else {
        Action::AddVmwareDc
    });
    actions
}

pub fn pod_actions(pod: &Pod) -> ActionSet {
    let mut actions = ActionSet::new();
    match pod.allocation {
        AllocationState::Enabled => {
            actions.insert(Action::Disable);
        }
        AllocationState::Disabled => {
            actions.insert(Action::Enable);
        }
        AllocationState::Unknown(_) => return actions,
    }
    actions.extend([Action::Edit, Action::Remove]);
    actions.insert(dedication_action(&pod.dedication));
    actions
}

pub fn cluster_actions(cluster: &Cluster) -> ActionSet {
    let mut actions = ActionSet::new();
    match cluster.state {
        ClusterState::Enabled => {
            actions.extend([Action::Unmanage, Action::Disable, Action::Edit, Action::Remove]);
        }
        ClusterState::Disabled => {
            actions.extend([Action::Unmanage, Action::Enable, Action::Edit, Action::Remove]);
        }
        ClusterState::Unmanaged
        | ClusterState::PrepareUnmanaged
        | ClusterState::PrepareUnmanagedError => {
            actions.extend([Action::Manage, Action::Remove]);
        }
        ClusterState::Unknown(_) => return actions,
    }
    actions.insert(dedication_action(&cluster.dedication));
    actions
}

pub fn host_actions(host: &Host) -> ActionSet {
    let mut actions = ActionSet::new();
    match host.resource_state {
        HostResourceState::Enabled => {
            actions.extend([Action::Edit, Action::EnableMaintenanceMode]);
            if host.status != HostStatus::Disconnected {
                actions.insert(Action::ForceReconnect);
            }
            if matches!(
                host.status,
                HostStatus::Down | HostStatus::Alert | HostStatus::Disconnected
            ) {
                actions.insert(Action::Remove);
            }
        }
        HostResourceState::ErrorInMaintenance => {
            actions.extend([
                Action::Edit,
                Action::EnableMaintenanceMode,
                Action::CancelMaintenanceMode,
            ]);
        }
        HostResourceState::PrepareForMaintenance => {
            actions.extend([Action::Edit, Action::CancelMaintenanceMode]);
        }
        HostResourceState::Maintenance => {
            actions.extend([Action::Edit, Action::CancelMaintenanceMode, Action::Remove]);
        }
        HostResourceState::Disabled => {
            actions.extend([Action::Edit, Action::Remove]);
        }
        HostResourceState::Unknown(_) => return actions,
    }
    actions.insert(dedication_action(&host.dedication));
    actions
}

pub fn primary_storage_actions(pool: &PrimaryStorage) -> ActionSet {
    let actions: &[Action] = match pool.state {
        StoragePoolState::Up | StoragePoolState::Connecting => {
            &[Action::Edit, Action::EnableMaintenanceMode]
        }
        StoragePoolState::Down => &[Action::Edit, Action::EnableMaintenanceMode, Action::Remove],
        StoragePoolState::Alert => &[Action::Edit, Action::Remove],
        StoragePoolState::ErrorInMaintenance => &[
            Action::Edit,
            Action::EnableMaintenanceMode,
            Action::CancelMaintenanceMode,
        ],
        StoragePoolState::PrepareForMaintenance => &[Action::Edit, Action::CancelMaintenanceMode],
        StoragePoolState::Maintenance => {
            &[Action::Edit, Action::CancelMaintenanceMode, Action::Remove]
        }
        StoragePoolState::Disconnected => &[Action::Edit, Action::Remove],
        StoragePoolState::Unknown(_) => &[],
    };
    actions.iter().copied().collect()
}

pub fn router_actions(router: &Router, ctx: &FilterContext) -> ActionSet {
    let mut actions = ActionSet::new();
    match router.state {
        VmState::Running => {
            actions.extend([
                Action::Stop,
                Action::ScaleUp,
                Action::Restart,
                Action::ViewConsole,
            ]);
            if ctx.is_admin {
                actions.insert(Action::Migrate);
            }
        }
        VmState::Stopped => {
            actions.extend([Action::Start, Action::ScaleUp, Action::Remove]);
            if router.vpc_id.is_some() {
                actions.insert(Action::ChangeService);
            }
        }
        VmState::Error | VmState::Destroyed | VmState::Unknown(_) => {}
    }
    actions
}

pub fn internal_lb_vm_actions(vm: &InternalLbVm, ctx: &FilterContext) -> ActionSet {
    let mut actions = ActionSet::new();
    match vm.state {
        VmState::Running => {
            actions.extend([Action::Stop, Action::ViewConsole]);
            if ctx.is_admin {
                actions.insert(Action::Migrate);
            }
        }
        VmState::Stopped => {
            actions.insert(Action::Start);
        }
        VmState::Error | VmState::Destroyed | VmState::Unknown(_) => {}
    }
    actions
}

pub fn system_vm_actions(vm: &SystemVm, ctx: &FilterContext) -> ActionSet {
    let mut actions = ActionSet::new();
    match vm.state {
        VmState::Running => {
            actions.extend([
                Action::Stop,
                Action::Restart,
                Action::Remove,
                Action::ScaleUp,
                Action::ViewConsole,
            ]);
            if ctx.is_admin {
                actions.insert(Action::Migrate);
            }
        }
        VmState::Stopped => {
            actions.extend([
                Action::Start,
                Action::ScaleUp,
                Action::ChangeService,
                Action::Remove,
            ]);
        }
        VmState::Error => {
            actions.insert(Action::Remove);
        }
        VmState::Destroyed | VmState::Unknown(_) => {}
    }
    actions
}

pub fn provider_actions(nsp: &NetworkServiceProvider) -> ActionSet {
    let mut actions = ActionSet::from([Action::Add]);
    match nsp.state {
        ProviderState::Enabled => actions.extend([Action::Disable, Action::Destroy]),
        ProviderState::Disabled => actions.extend([Action::Enable, Action::Destroy]),
        ProviderState::Unknown(_) => {}
    }
    actions
}
