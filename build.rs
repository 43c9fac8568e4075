//! Points Windows builds at a vcpkg FFmpeg install when `FFMPEG_DIR` is unset.

use std::env;
use std::path::PathBuf;

const WATCHED: [&str; 4] = ["FFMPEG_DIR", "VCPKG_ROOT", "VCPKGRS_DYNAMIC", "VCPKGRS_TRIPLET"];

fn main() {
    for variable in WATCHED {
        println!("cargo:rerun-if-env-changed={variable}");
    }

    let windows = env::var("CARGO_CFG_TARGET_OS").is_ok_and(|os| os == "windows");
    if !windows || env::var_os("FFMPEG_DIR").is_some() {
        return;
    }

    for hint in ffmpeg_hints() {
        println!("cargo:warning={hint}");
    }
}

fn ffmpeg_hints() -> Vec<String> {
    let Ok(root) = env::var("VCPKG_ROOT") else {
        return vec![
            "framescope needs FFmpeg: install it with vcpkg and set VCPKG_ROOT and FFMPEG_DIR"
                .to_string(),
        ];
    };

    let triplet = env::var("VCPKGRS_TRIPLET").unwrap_or_else(|_| "x64-windows".to_string());
    let install = PathBuf::from(root).join("installed").join(triplet);
    if !install.exists() {
        return vec![format!("no vcpkg FFmpeg found under {}", install.display())];
    }

    let mut hints = vec![format!(
        "vcpkg FFmpeg found at {0}; set FFMPEG_DIR={0} to use it explicitly",
        install.display()
    )];
    if env::var_os("VCPKGRS_DYNAMIC").is_none() {
        hints.push("set VCPKGRS_DYNAMIC=1 for dynamic vcpkg FFmpeg builds".to_string());
    }
    hints
}
