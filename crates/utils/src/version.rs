use std::sync::LazyLock;

use crate::build_info::BUILD_INFO;

/// Defines the application version, e.g. `0.1.0 (latest-1a2b3c4)`.
pub static VERSION: LazyLock<String> = LazyLock::new(|| {
    format!(
        "{} ({}-{}{})",
        env!("CARGO_PKG_VERSION"),
        env!("IMAGE_VERSION"),
        BUILD_INFO
            .commit_sha1
            .map(|sha| &sha[..sha.len().min(7)])
            .unwrap_or("unknown"),
        dirty_suffix(BUILD_INFO.git_dirty)
    )
});

fn dirty_suffix(git_dirty: Option<&str>) -> &'static str {
    if git_dirty == Some("true") {
        "-dirty"
    } else {
        ""
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_a_dirty_tree_is_flagged() {
        assert_eq!(dirty_suffix(Some("true")), "-dirty");
        assert_eq!(dirty_suffix(Some("false")), "");
        assert_eq!(dirty_suffix(None), "");
    }

    #[test]
    fn version_starts_with_package_version() {
        assert!(VERSION.starts_with(env!("CARGO_PKG_VERSION")));
    }
}
