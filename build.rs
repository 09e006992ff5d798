use std::env;
use std::time::{SystemTime, UNIX_EPOCH};

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");

    // Reproducible builds pin the timestamp, everyone else gets the build clock.
    let build_time = match env::var("SOURCE_DATE_EPOCH") {
        Ok(value) if value.trim().parse::<i64>().is_ok() => value.trim().to_string(),
        Ok(value) => {
            println!("cargo:warning=Ignoring invalid SOURCE_DATE_EPOCH '{value}'");
            now()
        }
        Err(_) => now(),
    };

    println!("cargo:rustc-env=STATIC_PLUGIN_BUILD_TIME={build_time}");
}

fn now() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
