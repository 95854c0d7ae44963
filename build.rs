// build.rs

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_X11_DISPLAY");

    // The headless display backend needs no native libraries. Only link X11
    // when the Xlib driver is compiled in.
    if std::env::var_os("CARGO_FEATURE_X11_DISPLAY").is_none() {
        return;
    }

    // Try pkg-config first, which is the standard way to find linking
    // information on Unix-like systems, and fall back to manual flags.
    if let Err(e) = pkg_config::probe_library("x11") {
        eprintln!(
            "pkg-config failed for library 'x11' ({}). Falling back to manual linking.",
            e
        );
        println!("cargo:rustc-link-lib=X11");
        println!("cargo:rustc-link-search=/usr/lib");
        eprintln!("Manual linking flags applied. Ensure the X11 development library is installed.");
    } else {
        eprintln!("pkg-config found libX11. Linking configured automatically.");
    }
}
