fn main() {
    // Keep `check-cfg` happy even when we skip `tauri_build::build()` (core-only builds).
    println!("cargo:rustc-check-cfg=cfg(desktop)");
    println!("cargo:rustc-check-cfg=cfg(mobile)");

    // `tauri_build::build()` expects the `tauri` crate to be present and reads env vars it
    // exports. Core-only builds do not compile the Tauri runtime, so the helper is skipped.
    #[cfg(feature = "app")]
    tauri_build::build();
}
