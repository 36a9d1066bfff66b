use std::path::{Path, PathBuf};

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Feature cfgs are not visible to build scripts; cargo exports them as env vars.
    if std::env::var_os("CARGO_FEATURE_AUDIO").is_none() {
        return;
    }

    // libopus_sys builds a static libopus under target/{profile}/build/libopus_sys-{hash}/out;
    // propagate its link path so test and bench binaries link against it too.
    if let Some(lib_dir) = find_bundled_opus() {
        println!("cargo:rustc-link-search=native={}", lib_dir.display());
        println!("cargo:rustc-link-lib=static=opus");
        println!("cargo:rerun-if-changed={}", lib_dir.display());
        return;
    }

    // Fallback: the links metadata variable, set for some build configurations
    if let Ok(lib_path) = std::env::var("DEP_OPUS_LIB") {
        println!("cargo:rustc-link-search=native={}", lib_path);
        println!("cargo:rustc-link-lib=static=opus");
    }
}

fn find_bundled_opus() -> Option<PathBuf> {
    let out_dir = std::env::var("OUT_DIR").ok()?;
    // OUT_DIR is target/{profile}/build/framereel-{hash}/out
    let build_dir = Path::new(&out_dir).parent()?.parent()?;

    std::fs::read_dir(build_dir)
        .ok()?
        .flatten()
        .filter(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .starts_with("libopus_sys-")
        })
        .flat_map(|entry| {
            let out = entry.path().join("out");
            [out.join("lib"), out.join("lib64")]
        })
        .find(|dir| dir.exists())
}
