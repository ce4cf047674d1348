//! Storage paths for remote objects.

use kubesync_core::{IdentityError, ObjectIdentity, ResourceType};

/// Path of `object` relative to its resource type's subtree:
/// `<namespace>/<name>` for namespaced kinds, `<name>` otherwise.
pub fn path<O>(resource: &ResourceType, object: &O) -> Result<String, IdentityError>
where
    O: ObjectIdentity + ?Sized,
{
    let name = object.name()?;
    if !resource.namespaced {
        return Ok(name.to_string());
    }
    let namespace = object
        .namespace()
        .ok_or_else(|| IdentityError::MissingNamespace {
            name: name.to_string(),
        })?;
    Ok(format!("{namespace}/{name}"))
}

/// Join a subtree prefix and a relative path.
pub fn join(prefix: &str, relative: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let relative = relative.trim_start_matches('/');
    match (prefix.is_empty(), relative.is_empty()) {
        (true, _) => relative.to_string(),
        (_, true) => prefix.to_string(),
        _ => format!("{prefix}/{relative}"),
    }
}
