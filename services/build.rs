use std::process::Command;

fn main() {
    let stamps = [
        ("BUILD_DATE", Some(chrono::Utc::now().to_rfc3339())),
        ("BUILD_COMMIT", git(&["rev-parse", "--short", "HEAD"])),
        ("BUILD_BRANCH", git(&["rev-parse", "--abbrev-ref", "HEAD"])),
    ];
    for (key, value) in stamps {
        let value = value.unwrap_or_else(|| "unknown".to_string());
        println!("cargo:rustc-env={key}={value}");
    }

    println!("cargo:rerun-if-changed=../.git/HEAD");
    println!("cargo:rerun-if-changed=migrations");
    println!("cargo:rerun-if-env-changed=PR_NUMBER");
}

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
