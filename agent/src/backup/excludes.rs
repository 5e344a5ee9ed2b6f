//! Exclude argument rendering for the archive and transfer tools
//!
//! tar matches exclude patterns against member names relative to `-C`, which
//! always start with `./` because we archive `.`; rsync anchors a pattern to
//! the transfer root only when it starts with `/`.

use super::Strategy;

/// Always excluded, for every strategy, and never prefixed.
pub const DEFAULT_EXCLUDE: &str = "lost+found";

pub fn build_exclude_args(patterns: &[String], strategy: Strategy) -> Vec<String> {
    let mut args = Vec::with_capacity(patterns.len() + 1);
    args.push(format!("--exclude={}", DEFAULT_EXCLUDE));

    for pattern in patterns {
        let arg = match strategy {
            Strategy::Archive => format!("--exclude=./{}", pattern),
            Strategy::Copy => format!("--exclude=/{}", pattern),
        };
        args.push(arg);
    }

    args
}
