//! Container names. The game loads mod containers after its own when their name ends in
//! `_9999999_P`.

/// Suffix every container name ends with
pub const PRIORITY_SUFFIX: &str = "_9999999_P";

/// Appends [`PRIORITY_SUFFIX`] to `name`, replacing a plain `_P` patch suffix.
pub fn container_name(name: &str) -> String {
    if name.ends_with(PRIORITY_SUFFIX) {
        name.to_string()
    } else if let Some(stem) = name.strip_suffix("_P") {
        format!("{stem}{PRIORITY_SUFFIX}")
    } else {
        format!("{name}{PRIORITY_SUFFIX}")
    }
}
