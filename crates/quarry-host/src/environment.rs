use crate::principal::PrincipalRef;
use crate::value::Value;

/// Prefix of the tag attached to marker objects an app creates
pub const MARKER_TAG_PREFIX: &str = "__quarry_marker_";

pub fn marker_tag(app: &str) -> String {
    format!("{}{}", MARKER_TAG_PREFIX, app)
}

/// Installed version of a named dependency, if any
pub trait DependencyResolver: Send + Sync {
    fn version_of(&self, id: &str) -> Option<String>;
}

/// The world the apps run in
pub trait HostEnvironment: DependencyResolver {
    /// Principal used for server-side callbacks
    fn server_principal(&self) -> PrincipalRef;

    /// An online player by name
    fn player(&self, name: &str) -> Option<PrincipalRef>;

    /// Remove every marker object carrying `tag`; returns how many went
    fn remove_markers(&self, tag: &str) -> usize;
}

/// Distribution source an app was installed from
pub trait StoreSource: Send + Sync {
    fn add_resource(&self, app: &str, resource: &Value) -> anyhow::Result<()>;

    fn add_library(&self, app: &str, library: &Value) -> anyhow::Result<()>;
}
