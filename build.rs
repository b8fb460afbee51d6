fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");

    let pkg = std::env::var("CARGO_PKG_VERSION").unwrap_or_default();
    let describe = std::process::Command::new("git")
        .args(["describe", "--always", "--dirty"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string());

    // outside a checkout (release tarball) only the crate version is known
    let version = match describe {
        Some(rev) if !rev.is_empty() => format!("{}+{}", pkg, rev),
        _ => pkg,
    };
    println!("cargo:rustc-env=WALK_TRACKER_VERSION={}", version);
}
