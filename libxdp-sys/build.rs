use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=lib.c");
    println!("cargo:rerun-if-changed=lib.h");

    // Locate the system libxdp; its pkg-config entry carries the include
    // paths for <xdp/xsk.h> and the link directives.
    let libxdp = pkg_config::Config::new()
        .probe("libxdp")
        .expect("Could not find libxdp via pkg-config");

    // The xsk ring accessors are static inline; compile thin wrappers so
    // the Rust side can call them through real symbols.
    let mut build = cc::Build::new();
    build.file("lib.c");
    for include_path in &libxdp.include_paths {
        build.include(include_path);
    }
    build.flag("-O2");
    build.compile("xskshim");

    println!("cargo:rustc-link-lib=xdp");
    println!("cargo:rustc-link-lib=bpf");

    let out_path = PathBuf::from(env::var("OUT_DIR").unwrap());
    let mut builder = bindgen::Builder::default()
        .header("lib.h")
        .allowlist_function("rust_xsk_.*")
        .allowlist_var("XSK_.*")
        .allowlist_var("XDP_.*")
        .allowlist_type("xsk_.*")
        .allowlist_type("xdp_.*")
        .parse_callbacks(Box::new(bindgen::CargoCallbacks::new()));
    for include_path in &libxdp.include_paths {
        builder = builder.clang_arg(format!("-I{}", include_path.display()));
    }
    builder
        .generate()
        .expect("Unable to generate bindings for libxdp")
        .write_to_file(out_path.join("bindings.rs"))
        .expect("Couldn't write bindings!");
}
