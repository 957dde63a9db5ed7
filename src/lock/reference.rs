// src/lock/reference.rs

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Well-known entity kinds of the appliance broker.
pub mod kinds {
    pub const VIRTUALIZATION_CONNECTOR: &str = "VirtualizationConnector";
    pub const APPLIANCE_MANAGER_CONNECTOR: &str = "ApplianceManagerConnector";
    pub const DISTRIBUTED_APPLIANCE: &str = "DistributedAppliance";
    pub const VIRTUAL_SYSTEM: &str = "VirtualSystem";
    pub const DEPLOYMENT_SPEC: &str = "DeploymentSpec";
    pub const DISTRIBUTED_APPLIANCE_INSTANCE: &str = "DistributedApplianceInstance";
    pub const SECURITY_GROUP: &str = "SecurityGroup";
    pub const SECURITY_GROUP_INTERFACE: &str = "SecurityGroupInterface";
    pub const JOB: &str = "Job";
}

/// Capability implemented by domain types that take part in locking.
pub trait Lockable {
    fn kind(&self) -> &str;
    fn id(&self) -> i64;
}

/// Identity of a lockable entity: `(object_type, object_id)`.
///
/// Immutable once built; only ever used as a map/set key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockObjectReference {
    object_type: String,
    object_id: i64,
}

/// Set of references a task must hold while it runs.
pub type LockSet = BTreeSet<LockObjectReference>;

impl LockObjectReference {
    pub fn new(object_type: impl Into<String>, object_id: i64) -> Self {
        Self {
            object_type: object_type.into(),
            object_id,
        }
    }

    /// Derive the reference from a [`Lockable`] entity.
    pub fn of<L: Lockable + ?Sized>(entity: &L) -> Self {
        Self::new(entity.kind(), entity.id())
    }

    /// Collect the references of several entities into a [`LockSet`].
    pub fn set_of<'a, L, I>(entities: I) -> LockSet
    where
        L: Lockable + ?Sized + 'a,
        I: IntoIterator<Item = &'a L>,
    {
        entities.into_iter().map(|e| Self::of(e)).collect()
    }

    pub fn object_type(&self) -> &str {
        &self.object_type
    }

    pub fn object_id(&self) -> i64 {
        self.object_id
    }
}

impl fmt::Display for LockObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type, self.object_id)
    }
}

/// Parses the `kind:id` form used in config files.
impl FromStr for LockObjectReference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| format!("invalid lock reference '{s}' (expected \"kind:id\")"))?;

        if kind.is_empty() {
            return Err(format!("invalid lock reference '{s}': empty kind"));
        }

        let id = id
            .parse::<i64>()
            .map_err(|e| format!("invalid lock reference '{s}': bad id ({e})"))?;

        Ok(Self::new(kind, id))
    }
}
