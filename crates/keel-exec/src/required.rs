//! Required-command lookup on `$PATH`

use tracing::debug;

/// Return the subset of `names` that cannot be found on `$PATH`, in input order
pub fn missing_commands<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    names
        .iter()
        .map(AsRef::as_ref)
        .filter(|name| match which::which(name) {
            Ok(path) => {
                debug!(command = %name, path = %path.display(), "found required command");
                false
            }
            Err(_) => true,
        })
        .map(str::to_string)
        .collect()
}
