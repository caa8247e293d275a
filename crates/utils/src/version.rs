use std::sync::LazyLock;

use crate::build_info::BuildInfo;

const SHORT_SHA_LEN: usize = 8;

fn short_sha(sha: &str) -> &str {
    sha.get(..SHORT_SHA_LEN).unwrap_or(sha)
}

/// Version string shared by the provider, gateway and plugin binaries.
pub static VERSION: LazyLock<String> = LazyLock::new(|| {
    let build_info = BuildInfo::current();
    format!(
        "{}-{}{}",
        env!("IMAGE_VERSION"),
        build_info.commit_sha1.map(short_sha).unwrap_or("unknown"),
        if build_info.git_dirty { "-dirty" } else { "" }
    )
});
