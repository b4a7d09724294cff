use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=lib.c");
    println!("cargo:rerun-if-changed=lib.h");

    // Use pkg-config to locate the dpdk library and get its compile options.
    let dpdk = pkg_config::Config::new()
        .probe("libdpdk")
        .expect("Could not find dpdk via pkg-config");

    // Compile the shim wrappers around DPDK's static-inline mbuf and
    // burst functions.
    let mut build = cc::Build::new();
    build.file("lib.c");
    for include_path in &dpdk.include_paths {
        build.include(include_path);
    }
    for (define, value) in &dpdk.defines {
        build.define(define, value.as_ref().map(|s| s.as_str()));
    }
    build.flag("-mssse3");
    build.flag("-O3");
    build.compile("dpdkshim");

    let out_path = PathBuf::from(env::var("OUT_DIR").unwrap());
    let mut builder = bindgen::Builder::default()
        .header("lib.h")
        .allowlist_function("rust_.*")
        .allowlist_function("rte_eal_init")
        .allowlist_function("rte_eal_cleanup")
        .allowlist_function("rte_eth_dev_start")
        .allowlist_function("rte_eth_dev_stop")
        .allowlist_function("rte_eth_dev_close")
        .allowlist_function("rte_eth_promiscuous_enable")
        .allowlist_function("rte_eth_stats_get")
        .allowlist_type("rte_eth_stats")
        .parse_callbacks(Box::new(bindgen::CargoCallbacks::new()));
    for include_path in &dpdk.include_paths {
        builder = builder.clang_arg(format!("-I{}", include_path.display()));
    }
    builder
        .generate()
        .expect("Unable to generate bindings for DPDK")
        .write_to_file(out_path.join("bindings.rs"))
        .expect("Couldn't write bindings!");
}
