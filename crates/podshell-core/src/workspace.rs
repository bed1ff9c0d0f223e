use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::action::TargetKey;

/// Something the entity store can hold: identified by `Id`, carrying an
/// optional locally-tracked `Status`.
pub trait Entity: Clone + PartialEq + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    type Id: TargetKey;
    type Status: Clone + PartialEq + fmt::Debug + Send + Sync + 'static;

    fn id(&self) -> &Self::Id;
    fn status(&self) -> Option<&Self::Status>;
    fn set_status(&mut self, status: Option<Self::Status>);
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self::new(id)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Workspace name as the workspace CLI knows it.
    WorkspaceId
);
string_id!(
    /// Name of a pro workspace instance.
    InstanceId
);

// ---------------------------------------------------------------------------
// Workspace
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkspaceStatus {
    Running,
    Busy,
    Stopped,
    NotFound,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for WorkspaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkspaceStatus::Running => "Running",
            WorkspaceStatus::Busy => "Busy",
            WorkspaceStatus::Stopped => "Stopped",
            WorkspaceStatus::NotFound => "NotFound",
            WorkspaceStatus::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_folder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl WorkspaceSource {
    /// Short human label: the repository, folder or image.
    pub fn label(&self) -> Option<&str> {
        self.git_repository
            .as_deref()
            .or(self.local_folder.as_deref())
            .or(self.image.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// One entry of `list --output=json`. Fields the shell does not model are
/// kept in `extra` so nothing is lost on a round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub id: WorkspaceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<NamedRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ide: Option<NamedRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<WorkspaceSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<WorkspaceStatus>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Workspace {
    pub fn new(id: impl Into<WorkspaceId>) -> Self {
        Self {
            id: id.into(),
            uid: None,
            provider: None,
            ide: None,
            source: None,
            last_used: None,
            status: None,
            extra: Map::new(),
        }
    }
}

impl Entity for Workspace {
    type Id = WorkspaceId;
    type Status = WorkspaceStatus;

    fn id(&self) -> &WorkspaceId {
        &self.id
    }

    fn status(&self) -> Option<&WorkspaceStatus> {
        self.status.as_ref()
    }

    fn set_status(&mut self, status: Option<WorkspaceStatus>) {
        self.status = status;
    }
}

// ---------------------------------------------------------------------------
// Pro instance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_workspace_status: Option<String>,
}

/// A workspace instance managed by a pro host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProInstance {
    pub id: InstanceId,
    #[serde(default)]
    pub metadata: InstanceMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<InstanceStatus>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProInstance {
    pub fn new(id: impl Into<InstanceId>) -> Self {
        Self {
            id: id.into(),
            metadata: InstanceMetadata::default(),
            status: None,
            extra: Map::new(),
        }
    }
}

impl Entity for ProInstance {
    type Id = InstanceId;
    type Status = InstanceStatus;

    fn id(&self) -> &InstanceId {
        &self.id
    }

    fn status(&self) -> Option<&InstanceStatus> {
        self.status.as_ref()
    }

    fn set_status(&mut self, status: Option<InstanceStatus>) {
        self.status = status;
    }
}
