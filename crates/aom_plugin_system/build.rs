//! Exposes the compiler version as `AOM_RUSTC_VERSION` so the plugin ABI
//! string can carry it.

use std::process::Command;

fn main() {
    let rust_version = rust_version();
    println!("cargo:rustc-env=AOM_RUSTC_VERSION={}", rust_version);
    println!("cargo:rerun-if-env-changed=RUSTC_VERSION");
    println!("cargo:rerun-if-changed=build.rs");
}

fn rust_version() -> String {
    if let Ok(version) = std::env::var("RUSTC_VERSION") {
        return version;
    }

    let rustc = std::env::var("RUSTC").unwrap_or_else(|_| "rustc".to_string());
    if let Ok(output) = Command::new(rustc).arg("--version").output() {
        if output.status.success() {
            // "rustc 1.75.0 (82e1608df 2023-12-21)"
            let stdout = String::from_utf8_lossy(&output.stdout);
            let mut parts = stdout.split_whitespace();
            if let (Some("rustc"), Some(version)) = (parts.next(), parts.next()) {
                return version.to_string();
            }
        }
    }

    "unknown".to_string()
}
