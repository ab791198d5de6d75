//! Build information stamped by `build.rs`.
//!
//! Version label per environment:
//! - PR: `pr:{number}` (`PR_NUMBER` at build time)
//! - Prod: `stable:{version}`
//! - Test/Local: `main:{commit}`

use crate::config::Env;

pub fn build_date() -> &'static str {
    env!("BUILD_DATE")
}

/// Short git commit hash, or `unknown` outside a checkout.
pub fn build_commit() -> &'static str {
    env!("BUILD_COMMIT")
}

pub fn build_branch() -> &'static str {
    env!("BUILD_BRANCH")
}

pub fn build_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Version label reported in the `x-service-version` header.
pub fn format_version_for_env(env: &Env) -> String {
    match env {
        Env::Pr => format!("pr:{}", option_env!("PR_NUMBER").unwrap_or("unknown")),
        Env::Prod => format!("stable:{}", build_version()),
        Env::Test | Env::Local => format!("main:{}", build_commit()),
    }
}
