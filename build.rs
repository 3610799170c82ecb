//! Build script: stamps the service with the commit it was built from

use std::path::Path;
use std::process::Command;

fn git_short_hash() -> Option<String> {
    let output = Command::new("git").args(["rev-parse", "--short", "HEAD"]).output().ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn main() {
    // Image builds without a checkout pass the hash in directly
    let git_hash = std::env::var("GIT_HASH")
        .ok()
        .map(|hash| hash.trim().to_string())
        .filter(|hash| !hash.is_empty() && !hash.contains(char::is_whitespace))
        .or_else(git_short_hash)
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=GIT_HASH={git_hash}");
    println!("cargo:rerun-if-env-changed=GIT_HASH");

    // A missing path would make cargo rerun this on every build
    if Path::new(".git/HEAD").exists() {
        println!("cargo:rerun-if-changed=.git/HEAD");
    }
}
