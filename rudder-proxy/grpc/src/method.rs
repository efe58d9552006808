use http::uri::PathAndQuery;
use std::fmt;

/// The fully-qualified name of Rudder's release module service.
pub const SERVICE: &str = "hapi.services.rudder.ReleaseModuleService";

/// The release module's RPCs. All of them are unary.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    Version,
    InstallRelease,
    DeleteRelease,
    RollbackRelease,
    UpgradeRelease,
    ReleaseStatus,
}

// === impl Method ===

impl Method {
    pub const ALL: [Self; 6] = [
        Self::Version,
        Self::InstallRelease,
        Self::DeleteRelease,
        Self::RollbackRelease,
        Self::UpgradeRelease,
        Self::ReleaseStatus,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Version => "Version",
            Self::InstallRelease => "InstallRelease",
            Self::DeleteRelease => "DeleteRelease",
            Self::RollbackRelease => "RollbackRelease",
            Self::UpgradeRelease => "UpgradeRelease",
            Self::ReleaseStatus => "ReleaseStatus",
        }
    }

    pub fn as_path(self) -> &'static str {
        match self {
            Self::Version => "/hapi.services.rudder.ReleaseModuleService/Version",
            Self::InstallRelease => "/hapi.services.rudder.ReleaseModuleService/InstallRelease",
            Self::DeleteRelease => "/hapi.services.rudder.ReleaseModuleService/DeleteRelease",
            Self::RollbackRelease => "/hapi.services.rudder.ReleaseModuleService/RollbackRelease",
            Self::UpgradeRelease => "/hapi.services.rudder.ReleaseModuleService/UpgradeRelease",
            Self::ReleaseStatus => "/hapi.services.rudder.ReleaseModuleService/ReleaseStatus",
        }
    }

    pub fn path(self) -> PathAndQuery {
        PathAndQuery::from_static(self.as_path())
    }

    pub fn from_path(path: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_path() == path)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
